//! An in-process store.
//!
//! Everything lives behind one mutex, and every [Store] operation holds it
//! from start to finish, so each operation is a single unit of work.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::thread::pick_epoch_match;
use crate::models::*;
use crate::query::ResponseQuery;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct Tables {
    boards: Vec<Board>,
    threads: HashMap<ThreadId, Thread>,
    /// Responses of each thread, in number order.
    responses: HashMap<ThreadId, Vec<Response>>,
}

impl Tables {
    fn board(&self, board_id: BoardId) -> Result<&Board> {
        self.boards.iter().find(|b| b.id == board_id).ok_or_else(|| {
            Error::BoardNotFound {
                board: board_id.to_string(),
            }
        })
    }

    /// Like [Tables::board], but an inactive board isn't found either.
    fn active_board(&self, board_id: BoardId) -> Result<&Board> {
        self.board(board_id)
            .ok()
            .filter(|b| b.is_active)
            .ok_or_else(|| Error::BoardNotFound {
                board: board_id.to_string(),
            })
    }

    fn resolve(&self, board_id: BoardId, thread: ThreadRef) -> Result<ThreadId> {
        match thread {
            ThreadRef::Id(id) => self
                .threads
                .get(&id)
                .filter(|t| t.board_id == board_id)
                .map(|t| t.id)
                .ok_or(Error::ThreadNotFound { thread }),
            ThreadRef::Epoch(epoch_id) => {
                let mut candidates: Vec<ThreadId> = self
                    .threads
                    .values()
                    .filter(|t| t.board_id == board_id && t.epoch_id == epoch_id)
                    .map(|t| t.id)
                    .collect();
                candidates.sort();

                pick_epoch_match(board_id, epoch_id, &candidates)
            }
        }
    }
}

/// A store that keeps everything in memory.
///
/// Nothing is persisted. Used by tests, benchmarks and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| Error::StoreLockPoisoned)
    }
}

impl Store for MemoryStore {
    fn board(&self, board_id: BoardId) -> Result<Board> {
        self.lock()?.board(board_id).cloned()
    }

    fn board_by_slug(&self, slug: &str) -> Result<Board> {
        self.lock()?
            .boards
            .iter()
            .find(|b| b.slug == slug && b.is_active)
            .cloned()
            .ok_or_else(|| Error::BoardNotFound {
                board: slug.to_string(),
            })
    }

    fn default_board(&self) -> Result<Board> {
        self.lock()?
            .boards
            .iter()
            .find(|b| b.is_default && b.is_active)
            .cloned()
            .ok_or(Error::NoDefaultBoard)
    }

    fn all_boards(&self) -> Result<Vec<Board>> {
        let mut boards: Vec<Board> = self
            .lock()?
            .boards
            .iter()
            .filter(|b| b.is_active)
            .cloned()
            .collect();
        boards.sort_by(|a, b| {
            (a.order_index, &a.slug).cmp(&(b.order_index, &b.slug))
        });

        Ok(boards)
    }

    fn insert_board(&self, board: Board) -> Result<()> {
        let mut tables = self.lock()?;

        if tables.boards.iter().any(|b| b.slug == board.slug) {
            return Err(Error::BoardExists { slug: board.slug });
        }

        if board.is_default {
            for other in tables.boards.iter_mut() {
                other.is_default = false;
            }
        }
        tables.boards.push(board);

        Ok(())
    }

    fn set_default_board(&self, board_id: BoardId) -> Result<()> {
        let mut tables = self.lock()?;

        tables.active_board(board_id)?;
        for board in tables.boards.iter_mut() {
            board.is_default = board.id == board_id;
        }

        Ok(())
    }

    fn resolve_thread(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
    ) -> Result<ThreadId> {
        self.lock()?.resolve(board_id, thread)
    }

    fn thread(&self, thread_id: ThreadId) -> Result<Thread> {
        self.lock()?
            .threads
            .get(&thread_id)
            .cloned()
            .ok_or(Error::ThreadNotFound {
                thread: thread_id.into(),
            })
    }

    fn thread_page(&self, board_id: BoardId, page: Page) -> Result<Vec<Thread>> {
        let tables = self.lock()?;

        let mut threads: Vec<&Thread> = tables
            .threads
            .values()
            .filter(|t| t.board_id == board_id)
            .collect();
        threads.sort_by(|a, b| {
            (b.updated_at, b.id).cmp(&(a.updated_at, a.id))
        });

        Ok(threads
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.width as usize)
            .cloned()
            .collect())
    }

    fn thread_count(&self, board_id: BoardId) -> Result<i64> {
        let tables = self.lock()?;
        let count = tables
            .threads
            .values()
            .filter(|t| t.board_id == board_id)
            .count();

        Ok(count as i64)
    }

    fn insert_thread(
        &self,
        thread: Thread,
        first: NewResponse,
    ) -> Result<Response> {
        let mut tables = self.lock()?;

        tables.active_board(thread.board_id)?;

        let first = first.numbered(thread.id, 1);
        tables.responses.insert(thread.id, vec![first.clone()]);
        tables.threads.insert(thread.id, thread);

        Ok(first)
    }

    fn append_response(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
        new_response: NewResponse,
        bump: bool,
    ) -> Result<(Thread, Response)> {
        let mut tables = self.lock()?;

        tables.active_board(board_id)?;
        let thread_id = tables.resolve(board_id, thread)?;

        let Tables {
            threads, responses, ..
        } = &mut *tables;

        let locked = threads
            .get_mut(&thread_id)
            .ok_or(Error::ThreadNotFound { thread })?;
        let responses = responses.entry(thread_id).or_default();

        let last = responses.iter().map(|r| r.number).max().unwrap_or(0);
        let posted = new_response.numbered(thread_id, last + 1);
        responses.push(posted.clone());

        if bump {
            locked.bump_to(posted.posted_at);
        }

        Ok((locked.clone(), posted))
    }

    fn responses(
        &self,
        thread_id: ThreadId,
        query: ResponseQuery,
    ) -> Result<Vec<Response>> {
        let tables = self.lock()?;

        if !tables.threads.contains_key(&thread_id) {
            return Err(Error::ThreadNotFound {
                thread: thread_id.into(),
            });
        }

        let responses = tables
            .responses
            .get(&thread_id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(query.select(responses).into_iter().cloned().collect())
    }
}
