//! Types related to threads.

use chrono::offset::Utc;
use chrono::DateTime;

use diesel::{insert_into, prelude::*};

use log::warn;

use serde::Serialize;

use crate::models::board::lock_active_board;
use crate::models::*;
use crate::schema::thread;
use crate::{Error, Result};

/// A series of responses about a specific subject.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize)]
#[diesel(table_name = thread)]
pub struct Thread {
    pub id: ThreadId,
    /// The legacy numeric key. Not unique.
    pub epoch_id: EpochId,
    pub title: String,
    /// When the thread was created.
    pub posted_at: DateTime<Utc>,
    /// When the thread was last bumped. Never earlier than `posted_at`.
    pub updated_at: DateTime<Utc>,
    pub board_id: BoardId,
}

impl Thread {
    /// Move `updated_at` up to `at`. Never moves it back.
    ///
    /// Returns whether anything changed.
    pub(crate) fn bump_to(&mut self, at: DateTime<Utc>) -> bool {
        if self.updated_at < at {
            self.updated_at = at;
            true
        } else {
            false
        }
    }
}

/// Convenience function to convert from diesel's error type into our error
/// type, when we're querying for a thread.
pub(crate) fn conv_thread_error(
    thread: ThreadRef,
) -> impl FnOnce(diesel::result::Error) -> Error {
    move |e: diesel::result::Error| match e {
        diesel::result::Error::NotFound => Error::ThreadNotFound { thread },
        _ => Error::from(e),
    }
}

/// Pick the thread an epoch id refers to.
///
/// Two threads created on one board in the same second share an epoch id.
/// When that happens the earliest created thread wins. `candidates` must be
/// sorted by id, which sorts by creation time.
pub(crate) fn pick_epoch_match(
    board_id: BoardId,
    epoch_id: EpochId,
    candidates: &[ThreadId],
) -> Result<ThreadId> {
    match candidates {
        [] => Err(Error::ThreadNotFound {
            thread: ThreadRef::Epoch(epoch_id),
        }),
        [only] => Ok(*only),
        [first, ..] => {
            warn!(
                "Epoch id {} on board {} matches {} threads, using {}",
                epoch_id,
                board_id,
                candidates.len(),
                first
            );
            Ok(*first)
        }
    }
}

/// Resolve a thread reference using an open connection.
pub(crate) fn resolve_thread_in(
    conn: &mut PgConnection,
    board: BoardId,
    thread_ref: ThreadRef,
) -> Result<ThreadId> {
    use crate::schema::thread::columns::{board_id, epoch_id, id};
    use crate::schema::thread::dsl::thread;

    match thread_ref {
        ThreadRef::Id(thread_id) => thread
            .filter(id.eq(thread_id))
            .filter(board_id.eq(board))
            .select(id)
            .first(conn)
            .map_err(conv_thread_error(thread_ref)),
        ThreadRef::Epoch(epoch) => {
            let candidates: Vec<ThreadId> = thread
                .filter(board_id.eq(board))
                .filter(epoch_id.eq(epoch))
                .select(id)
                .order(id.asc())
                .load(conn)?;

            pick_epoch_match(board, epoch, &candidates)
        }
    }
}

impl Database {
    /// Find the canonical id of a thread on a board.
    pub fn resolve_thread(
        &self,
        board_id: BoardId,
        thread_ref: ThreadRef,
    ) -> Result<ThreadId> {
        resolve_thread_in(&mut *self.conn()?, board_id, thread_ref)
    }

    /// Get a thread.
    pub fn thread(&self, thread_id: ThreadId) -> Result<Thread> {
        use crate::schema::thread::dsl::thread;

        thread
            .find(thread_id)
            .first(&mut self.conn()?)
            .map_err(conv_thread_error(thread_id.into()))
    }

    /// Get a single page of threads on a board.
    ///
    /// The order here is the bump order of the thread, i.e. sort by the
    /// timestamp of the most recent response made to the thread which isn't
    /// a "sage" response.
    pub fn thread_page(
        &self,
        board: BoardId,
        page: Page,
    ) -> Result<Vec<Thread>> {
        use crate::schema::thread::columns::{board_id, id, updated_at};
        use crate::schema::thread::dsl::thread;

        Ok(thread
            .filter(board_id.eq(board))
            .order((updated_at.desc(), id.desc()))
            .limit(page.width.into())
            .offset(page.offset().into())
            .load(&mut self.conn()?)?)
    }

    /// How many threads a board has.
    pub fn thread_count(&self, board: BoardId) -> Result<i64> {
        use crate::schema::thread::columns::board_id;
        use crate::schema::thread::dsl::thread;

        Ok(thread
            .filter(board_id.eq(board))
            .count()
            .get_result(&mut self.conn()?)?)
    }

    /// Insert a thread and its first response in one transaction.
    ///
    /// The thread's board must exist and be active.
    pub fn insert_thread(
        &self,
        new_thread: Thread,
        first: NewResponse,
    ) -> Result<Response> {
        use crate::schema::response::dsl::response;
        use crate::schema::thread::dsl::thread;

        self.conn()?.transaction::<_, Error, _>(|conn| {
            lock_active_board(conn, new_thread.board_id)?;

            insert_into(thread).values(&new_thread).execute(conn)?;

            let first = first.numbered(new_thread.id, 1);
            insert_into(response)
                .values(&ResponseRow::from(&first))
                .execute(conn)?;

            Ok(first)
        })
    }
}
