// ABOUTME: Stateful single-file edit flow: list, open, save, cancel
// ABOUTME: Writes are atomic (temp file + rename); at most one edit session per user

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use termbot_core::model::{EditSession, EditState};

const PAGE_SIZE: usize = 20;

pub struct EditSessionManager {
    root: PathBuf,
    sessions: Mutex<std::collections::HashMap<String, EditSession>>,
}

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("an edit session is already open, finish it first")]
    AlreadyOpen,
    #[error("no edit session is open")]
    NotOpen,
    #[error("path escapes the workspace root")]
    PathTraversal,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EditSessionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Regular files directly under `dir` (no recursion), one page at a time.
    pub fn list_files(&self, dir: &str, page: usize) -> Result<Vec<String>, EditError> {
        let resolved = self.resolve(dir)?;
        let mut names = Vec::new();
        if resolved.exists() {
            for entry in std::fs::read_dir(&resolved)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        names.sort();
        let start = page * PAGE_SIZE;
        Ok(names.into_iter().skip(start).take(PAGE_SIZE).collect())
    }

    pub fn open(&self, user_id: &str, rel_path: &str) -> Result<(EditSession, String), EditError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(user_id) {
            return Err(EditError::AlreadyOpen);
        }

        let resolved = self.resolve(rel_path)?;
        let content = std::fs::read_to_string(&resolved).unwrap_or_default();

        let session = EditSession {
            edit_id: uuid::Uuid::new_v4().to_string(),
            path: rel_path.to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            state: EditState::AwaitingContent,
        };
        sessions.insert(user_id.to_string(), session.clone());
        Ok((session, content))
    }

    pub fn active(&self, user_id: &str) -> Option<EditSession> {
        self.sessions.lock().unwrap().get(user_id).cloned()
    }

    /// The next non-slash message from the user while a session is open
    /// becomes the replacement content.
    pub fn save(&self, user_id: &str, content: &str) -> Result<EditSession, EditError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(user_id).ok_or(EditError::NotOpen)?;
        session.state = EditState::Saving;
        let resolved = self.resolve(&session.path)?;

        write_atomic(&resolved, content)?;

        session.state = EditState::Closed;
        let closed = session.clone();
        sessions.remove(user_id);
        Ok(closed)
    }

    /// `/cancel`: closes without writing.
    pub fn cancel(&self, user_id: &str) -> Result<(), EditError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.remove(user_id).is_none() {
            return Err(EditError::NotOpen);
        }
        Ok(())
    }

    fn resolve(&self, rel_path: &str) -> Result<PathBuf, EditError> {
        if rel_path.contains("..") {
            return Err(EditError::PathTraversal);
        }
        Ok(self.root.join(Path::new(rel_path)))
    }
}

fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = if let Some(parent) = parent {
        tempfile::NamedTempFile::new_in(parent)?
    } else {
        tempfile::NamedTempFile::new()?
    };
    use std::io::Write;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_save_writes_new_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "old").unwrap();
        let mgr = EditSessionManager::new(dir.path());

        let (session, content) = mgr.open("u1", "notes.txt").unwrap();
        assert_eq!(content, "old");
        assert_eq!(session.state, EditState::AwaitingContent);

        mgr.save("u1", "hello").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "hello"
        );
        assert!(mgr.active("u1").is_none());
    }

    #[test]
    fn s6_edit_flow_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = EditSessionManager::new(dir.path());
        mgr.open("u1", "notes.txt").unwrap();
        mgr.save("u1", "hello").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn invariant_6_cancel_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "old").unwrap();
        let mgr = EditSessionManager::new(dir.path());
        mgr.open("u1", "notes.txt").unwrap();
        mgr.cancel("u1").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "old"
        );
        assert!(mgr.active("u1").is_none());
    }

    #[test]
    fn second_open_while_one_is_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = EditSessionManager::new(dir.path());
        mgr.open("u1", "a.txt").unwrap();
        let err = mgr.open("u1", "b.txt").unwrap_err();
        assert!(matches!(err, EditError::AlreadyOpen));
    }

    #[test]
    fn path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = EditSessionManager::new(dir.path());
        let err = mgr.open("u1", "../etc/passwd").unwrap_err();
        assert!(matches!(err, EditError::PathTraversal));
    }

    #[test]
    fn list_files_is_non_recursive_and_paginated() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..25 {
            std::fs::write(dir.path().join(format!("f{i:02}.txt")), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("subdir/nested.txt"), "x").unwrap();

        let mgr = EditSessionManager::new(dir.path());
        let page0 = mgr.list_files("", 0).unwrap();
        let page1 = mgr.list_files("", 1).unwrap();
        assert_eq!(page0.len(), 20);
        assert_eq!(page1.len(), 5);
        assert!(!page0.contains(&"nested.txt".to_string()));
    }
}
