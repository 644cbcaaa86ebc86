use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coven_types::{Entry, JournalId, JournalRecord, Position};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::JournalError;
use crate::scrivener::Scrivener;

const RECORD_SUFFIX: &str = ".json";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// On-disk record shape: one JSON object per file, file named by the
/// zero-padded position.
#[derive(Serialize, Deserialize)]
struct RawRecord {
    pos: Position,
    #[serde(rename = "type")]
    tag: String,
    at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// File-backed [`Scrivener`]: each record is a JSON file named
/// `{position:020}.json` under the journal directory.
///
/// `open` recovers the head by directory scan, so a journal survives
/// process restarts. A record that fails to decode blocks forward
/// progress at its position: `next_after` polls it (with a warning) until
/// it becomes readable or the consumer cancels. Backward scans may pass
/// over such records on request.
///
/// Readers read whole files and hold no handles between polls, so
/// deleting an in-flight record file is never blocked by a reader.
pub struct FileScrivener<T> {
    id: JournalId,
    dir: PathBuf,
    append_lock: tokio::sync::Mutex<()>,
    head_tx: watch::Sender<Position>,
    poll_interval: Duration,
    disposed: AtomicBool,
    _entry: PhantomData<fn() -> T>,
}

impl<T> FileScrivener<T>
where
    T: Entry + Serialize + DeserializeOwned,
{
    /// Open (or create) the journal directory and recover the head from
    /// the highest position-named file.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut head = 0;
        for dirent in std::fs::read_dir(&dir)? {
            if let Some(position) = parse_position(&dirent?.file_name()) {
                head = head.max(position);
            }
        }

        let (head_tx, _) = watch::channel(head);
        Ok(Self {
            id: JournalId::new(),
            dir,
            append_lock: tokio::sync::Mutex::new(()),
            head_tx,
            poll_interval: DEFAULT_POLL_INTERVAL,
            disposed: AtomicBool::new(false),
            _entry: PhantomData,
        })
    }

    /// How often a blocked reader re-checks an unreadable record.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn record_path(&self, position: Position) -> PathBuf {
        self.dir.join(format!("{position:020}{RECORD_SUFFIX}"))
    }

    fn check_live(&self) -> Result<(), JournalError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(JournalError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn read_record(&self, position: Position) -> Result<JournalRecord<T>, JournalError> {
        let bytes = tokio::fs::read(self.record_path(position))
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => JournalError::Unreadable {
                    position,
                    reason: "record file is missing".into(),
                },
                _ => JournalError::Io(e),
            })?;
        let raw: RawRecord =
            serde_json::from_slice(&bytes).map_err(|e| JournalError::Unreadable {
                position,
                reason: e.to_string(),
            })?;
        if raw.pos != position {
            return Err(JournalError::Unreadable {
                position,
                reason: format!("record claims position {}", raw.pos),
            });
        }
        let entry: T = serde_json::from_value(raw.payload).map_err(|e| JournalError::Unreadable {
            position,
            reason: e.to_string(),
        })?;
        Ok(JournalRecord {
            position,
            timestamp: raw.at,
            entry,
        })
    }
}

fn parse_position(name: &std::ffi::OsStr) -> Option<Position> {
    name.to_str()?
        .strip_suffix(RECORD_SUFFIX)?
        .parse::<Position>()
        .ok()
        .filter(|position| *position >= 1)
}

#[async_trait]
impl<T> Scrivener<T> for FileScrivener<T>
where
    T: Entry + Serialize + DeserializeOwned,
{
    fn id(&self) -> JournalId {
        self.id
    }

    fn head(&self) -> Position {
        *self.head_tx.borrow()
    }

    async fn append(&self, entry: T) -> Result<Position, JournalError> {
        self.check_live()?;
        let _guard = self.append_lock.lock().await;
        let position = *self.head_tx.borrow() + 1;

        let raw = RawRecord {
            pos: position,
            tag: entry.tag().into(),
            at: Utc::now(),
            payload: serde_json::to_value(&entry).map_err(|e| JournalError::Unwritable {
                reason: e.to_string(),
            })?,
        };
        let mut bytes = serde_json::to_vec(&raw).map_err(|e| JournalError::Unwritable {
            reason: e.to_string(),
        })?;
        bytes.push(b'\n');

        // Write-then-rename so readers never observe a partial record.
        let staging = self.dir.join(format!("{position:020}.staging"));
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, self.record_path(position)).await?;

        // Published under the append lock: heads appear in append order.
        self.head_tx.send_replace(position);
        Ok(position)
    }

    async fn next_after(
        &self,
        after: Position,
        cancel: &CancellationToken,
    ) -> Result<JournalRecord<T>, JournalError> {
        if after < 0 {
            return Err(JournalError::OutOfRange(after));
        }
        let target = after + 1;
        let mut head_rx = self.head_tx.subscribe();
        let mut warned = false;
        loop {
            self.check_live()?;
            if *head_rx.borrow_and_update() >= target {
                match self.read_record(target).await {
                    Ok(record) => return Ok(record),
                    Err(JournalError::Unreadable { position, reason }) => {
                        if !warned {
                            warn!(
                                journal = %self.id,
                                position,
                                %reason,
                                "record is unreadable; blocking until it becomes readable"
                            );
                            warned = true;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(JournalError::Cancelled),
                            _ = tokio::time::sleep(self.poll_interval) => {}
                        }
                    }
                    Err(e) => return Err(e),
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(JournalError::Cancelled),
                    changed = head_rx.changed() => {
                        if changed.is_err() {
                            return Err(JournalError::Disposed);
                        }
                    }
                }
            }
        }
    }

    async fn prev_before(
        &self,
        before: Position,
        skip_unreadable: bool,
    ) -> Result<Option<JournalRecord<T>>, JournalError> {
        self.check_live()?;
        if before <= 0 {
            return Err(JournalError::OutOfRange(before));
        }
        let mut position = (before - 1).min(self.head());
        while position >= 1 {
            match self.read_record(position).await {
                Ok(record) => return Ok(Some(record)),
                Err(JournalError::Unreadable { .. }) if skip_unreadable => position -= 1,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.head_tx.send_modify(|_| {});
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::scrivener::ScrivenerExt;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    enum Note {
        Text(String),
    }

    impl Entry for Note {
        fn tag(&self) -> &'static str {
            "Text"
        }
    }

    fn text(s: &str) -> Note {
        Note::Text(s.into())
    }

    fn open(dir: &std::path::Path) -> FileScrivener<Note> {
        FileScrivener::open(dir)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5))
    }

    #[test_log::test(tokio::test)]
    async fn append_then_tail_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let scriv = open(dir.path());

        scriv.append(text("hi")).await.unwrap();
        scriv.append(text("there")).await.unwrap();

        let mut tail = scriv.tail(0, CancellationToken::new());
        let first = tail.next().await.unwrap();
        let second = tail.next().await.unwrap();
        assert_eq!((first.position, first.entry), (1, text("hi")));
        assert_eq!((second.position, second.entry), (2, text("there")));
    }

    #[test_log::test(tokio::test)]
    async fn head_recovers_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let scriv = open(dir.path());
            for n in 0..3 {
                scriv.append(text(&format!("n{n}"))).await.unwrap();
            }
        }

        let scriv = open(dir.path());
        assert_eq!(scriv.head(), 3);
        assert_eq!(scriv.append(text("n3")).await.unwrap(), 4);
    }

    #[test_log::test(tokio::test)]
    async fn unreadable_record_blocks_tail_instead_of_skipping() {
        let dir = tempfile::tempdir().unwrap();
        let scriv = open(dir.path());
        for entry in ["a", "b", "c"] {
            scriv.append(text(entry)).await.unwrap();
        }

        let second = dir.path().join(format!("{:020}.json", 2));
        let original = std::fs::read(&second).unwrap();
        std::fs::write(&second, b"not a record").unwrap();

        let mut tail = scriv.tail(0, CancellationToken::new());
        assert_eq!(tail.next().await.unwrap().position, 1);

        // Blocked at position 2; position 3 must not leak past it.
        let blocked = tokio::time::timeout(Duration::from_millis(50), tail.next()).await;
        assert!(blocked.is_err());

        // Once the record is readable again the tail resumes contiguously.
        std::fs::write(&second, &original).unwrap();
        assert_eq!(tail.next().await.unwrap().position, 2);
        assert_eq!(tail.next().await.unwrap().position, 3);
    }

    #[test_log::test(tokio::test)]
    async fn backward_scan_skips_unreadable_only_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let scriv = open(dir.path());
        for entry in ["a", "b", "c"] {
            scriv.append(text(entry)).await.unwrap();
        }
        std::fs::write(dir.path().join(format!("{:020}.json", 2)), b"garbage").unwrap();

        let mut strict = scriv.read_backward(4);
        assert_eq!(strict.next().await.unwrap().unwrap().position, 3);
        assert!(matches!(
            strict.next().await,
            Err(JournalError::Unreadable { position: 2, .. })
        ));

        let mut backward = scriv.read_backward(4).skipping_unreadable();
        let mut positions = Vec::new();
        while let Some(record) = backward.next().await.unwrap() {
            positions.push(record.position);
        }
        assert_eq!(positions, vec![3, 1]);
    }

    #[test_log::test(tokio::test)]
    async fn waiter_observes_append_from_another_task() {
        let dir = tempfile::tempdir().unwrap();
        let scriv = std::sync::Arc::new(open(dir.path()));
        let cancel = CancellationToken::new();

        let waiter = {
            let scriv = scriv.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                scriv
                    .wait_for(0, |e| *e == Note::Text("hello".into()), &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;
        scriv.append(text("hello")).await.unwrap();

        let (position, entry) = waiter.await.unwrap().unwrap();
        assert_eq!((position, entry), (1, text("hello")));
    }
}
