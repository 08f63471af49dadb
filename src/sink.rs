use std::time::Duration;

use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::sleep,
};
use tokio_retry::strategy::ExponentialBackoff;

use crate::event::ObjectMap;
use crate::internal_events::{
    SinkConnectionEstablished, SinkConnectionFailed, SinkEventSent, SinkWriteError,
};

#[derive(Debug)]
pub(crate) enum Message {
    Event(Box<ObjectMap>),
    ForceDisconnect,
    Stop,
}

/// Producer half of the Logstash sink. All operations are non-blocking: the
/// unbounded queue absorbs bursts, and control messages travel the same
/// queue so `stop` drains every event enqueued before it.
#[derive(Clone, Debug)]
pub struct LogstashSender {
    tx: UnboundedSender<Message>,
}

impl LogstashSender {
    pub fn send(&self, event: ObjectMap) {
        // Failure means the writer is already gone, which only happens
        // during teardown.
        let _ = self.tx.send(Message::Event(Box::new(event)));
    }

    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    pub fn force_disconnect(&self) {
        let _ = self.tx.send(Message::ForceDisconnect);
    }
}

/// Writer half: owns the TCP connection to Logstash and ships one JSON
/// object per line. Delivery is at-least-once; a failed write reconnects
/// and resends the same event.
#[derive(Debug)]
pub struct LogstashWriter {
    address: String,
    rx: UnboundedReceiver<Message>,
}

pub fn logstash_pair(address: String) -> (LogstashSender, LogstashWriter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LogstashSender { tx }, LogstashWriter { address, rx })
}

/// Sender wired to a bare channel, so tests can observe what a component
/// hands to the sink without a live writer.
#[cfg(test)]
pub(crate) fn test_pair() -> (LogstashSender, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LogstashSender { tx }, rx)
}

impl LogstashWriter {
    fn fresh_backoff() -> ExponentialBackoff {
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(60))
    }

    async fn connect_backoff(&self) -> TcpStream {
        let mut backoff = Self::fresh_backoff();
        loop {
            match TcpStream::connect(&self.address).await {
                Ok(socket) => {
                    emit!(SinkConnectionEstablished {
                        peer_addr: socket.peer_addr().ok(),
                    });
                    return socket;
                }
                Err(error) => {
                    emit!(SinkConnectionFailed { error: &error });
                    sleep(backoff.next().expect("backoff is infinite")).await;
                }
            }
        }
    }

    pub async fn run(mut self) {
        let mut connection: Option<TcpStream> = None;

        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Event(event) => {
                    let mut line = match serde_json::to_vec(&*event) {
                        Ok(line) => line,
                        Err(error) => {
                            error!(message = "Dropping unserializable event.", %error);
                            continue;
                        }
                    };
                    line.push(b'\n');

                    loop {
                        if connection.is_none() {
                            connection = Some(self.connect_backoff().await);
                        }
                        let socket = connection.as_mut().expect("connection just established");
                        match write_line(socket, &line).await {
                            Ok(()) => {
                                emit!(SinkEventSent {
                                    byte_size: line.len(),
                                });
                                break;
                            }
                            Err(error) => {
                                emit!(SinkWriteError { error: &error });
                                connection = None;
                            }
                        }
                    }
                }
                Message::ForceDisconnect => {
                    connection = None;
                }
                Message::Stop => break,
            }
        }

        if let Some(mut socket) = connection {
            let _ = socket.shutdown().await;
        }
        debug!(message = "Logstash writer stopped.");
    }
}

async fn write_line(socket: &mut TcpStream, line: &[u8]) -> std::io::Result<()> {
    socket.write_all(line).await?;
    socket.flush().await
}
