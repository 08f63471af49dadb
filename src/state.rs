use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// On-disk format of the cursor file. Incompatible changes get a new variant
/// here and handling wherever this format is transited; the file is only
/// ever read back by this store.
#[derive(Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(tag = "version")]
enum State {
    #[serde(rename = "1")]
    V1 { cursors: BTreeMap<String, String> },
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".new");
    PathBuf::from(tmp)
}

/// Reads the persisted id → cursor map. A missing, unreadable, or corrupt
/// file yields an empty map; resuming from scratch re-ships some lines but
/// never aborts startup.
pub fn load(path: &Path) -> BTreeMap<String, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(error) => {
            error!(message = "Unable to read state file.", path = %path.display(), %error);
            return BTreeMap::new();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(State::V1 { cursors }) => cursors,
        Err(error) => {
            error!(message = "State file is corrupt, starting empty.", path = %path.display(), %error);
            BTreeMap::new()
        }
    }
}

/// Persists the cursor map: serialize to `<path>.new`, then rename over the
/// stable file so readers never observe a partial write.
pub fn save(path: &Path, cursors: &BTreeMap<String, String>) -> io::Result<()> {
    let state = State::V1 {
        cursors: cursors.clone(),
    };
    let json = serde_json::to_vec(&state)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursors() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            "0123abcd".to_string(),
            "2020-05-01T12:34:56.123456789Z".to_string(),
        );
        map.insert(
            "deadbeef".to_string(),
            "1970-01-01T00:00:00.000000000Z".to_string(),
        );
        map
    }

    #[test]
    fn round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let saved = cursors();
        save(&path, &saved).unwrap();
        assert_eq!(load(&path), saved);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).is_empty());
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(load(&path).is_empty());
    }

    #[test]
    fn unversioned_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, br#"{"0123abcd":"2020-05-01T12:34:56.123456789Z"}"#).unwrap();
        assert!(load(&path).is_empty());
    }

    #[test]
    fn save_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        save(&path, &cursors()).unwrap();
        let mut updated = cursors();
        updated.insert(
            "0123abcd".to_string(),
            "2021-01-01T00:00:00.000000000Z".to_string(),
        );
        updated.remove("deadbeef");
        save(&path, &updated).unwrap();

        assert_eq!(load(&path), updated);
        assert!(!tmp_path(&path).exists());
    }
}
