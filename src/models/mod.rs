//! Models and types related to storage.
//!
//! Posting code only talks to the [Store] trait. There are two stores: the
//! PostgreSQL-backed [Database] and the in-process [MemoryStore].

use std::fmt::Debug;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::PgConnection;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use log::info;

use crate::query::ResponseQuery;
use crate::{Error, Result};

pub mod board;
pub mod memory;
pub mod response;
pub mod thread;

pub use crate::address::{
    BoardId, EpochId, ResponseId, ResponseNumber, ThreadId, ThreadRef,
};
pub use board::*;
pub use memory::MemoryStore;
pub use response::*;
pub use thread::*;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Everything the posting code needs from a backing store.
///
/// Implementations must make [Store::insert_thread] and
/// [Store::append_response] all-or-nothing. `append_response` additionally
/// has to assign `max(number) + 1` inside the same unit of work as the
/// insert, so that concurrent appends to one thread get consecutive numbers.
pub trait Store {
    /// Get a board by id.
    fn board(&self, board_id: BoardId) -> Result<Board>;

    /// Get a board by its slug.
    fn board_by_slug(&self, slug: &str) -> Result<Board>;

    /// Get the default board.
    fn default_board(&self) -> Result<Board>;

    /// All active boards, in display order.
    fn all_boards(&self) -> Result<Vec<Board>>;

    /// Insert a new board. If it is marked as default, it replaces the current
    /// default board.
    fn insert_board(&self, board: Board) -> Result<()>;

    /// Make a board the only default board.
    fn set_default_board(&self, board_id: BoardId) -> Result<()>;

    /// Find the canonical id of a thread on a board.
    fn resolve_thread(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
    ) -> Result<ThreadId>;

    /// Get a thread.
    fn thread(&self, thread_id: ThreadId) -> Result<Thread>;

    /// Get a page of threads on a board, most recently bumped first.
    fn thread_page(&self, board_id: BoardId, page: Page) -> Result<Vec<Thread>>;

    /// How many threads a board has.
    fn thread_count(&self, board_id: BoardId) -> Result<i64>;

    /// Insert a thread together with its first response, numbered 1. The
    /// thread's board must be active.
    fn insert_thread(
        &self,
        thread: Thread,
        first: NewResponse,
    ) -> Result<Response>;

    /// Append a response to a thread and give it the next number.
    ///
    /// The board must be active. If `bump` is set the thread's `updated_at`
    /// is moved up to the response's `posted_at` in the same unit of work.
    /// Returns the thread as that unit of work left it, with the response.
    fn append_response(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
        new_response: NewResponse,
        bump: bool,
    ) -> Result<(Thread, Response)>;

    /// Get responses of a thread, in ascending number order.
    fn responses(
        &self,
        thread_id: ThreadId,
        query: ResponseQuery,
    ) -> Result<Vec<Response>>;
}

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// A pool of connections to the PostgreSQL database.
pub struct Database {
    pool: PgPool,
}

impl Debug for Database {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let state = self.pool.state();

        write!(
            fmt,
            "<#Database connections={} idle_connections={}>",
            state.connections, state.idle_connections,
        )?;

        Ok(())
    }
}

impl Database {
    /// Open a connection pool and run any pending migrations.
    pub fn open<S>(url: S, pool_size: u32) -> Result<Database>
    where
        S: AsRef<str>,
    {
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(ConnectionManager::<PgConnection>::new(url.as_ref()))?;

        let applied = pool
            .get()?
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| Error::DatabaseMigrationError(e.to_string()))?
            .len();

        if applied > 0 {
            info!("Applied {} database migration(s)", applied);
        }

        Ok(Database { pool })
    }

    fn conn(&self) -> Result<PgPooled> {
        Ok(self.pool.get()?)
    }
}

impl Store for Database {
    fn board(&self, board_id: BoardId) -> Result<Board> {
        Database::board(self, board_id)
    }

    fn board_by_slug(&self, slug: &str) -> Result<Board> {
        Database::board_by_slug(self, slug)
    }

    fn default_board(&self) -> Result<Board> {
        Database::default_board(self)
    }

    fn all_boards(&self) -> Result<Vec<Board>> {
        Database::all_boards(self)
    }

    fn insert_board(&self, board: Board) -> Result<()> {
        Database::insert_board(self, board)
    }

    fn set_default_board(&self, board_id: BoardId) -> Result<()> {
        Database::set_default_board(self, board_id)
    }

    fn resolve_thread(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
    ) -> Result<ThreadId> {
        Database::resolve_thread(self, board_id, thread)
    }

    fn thread(&self, thread_id: ThreadId) -> Result<Thread> {
        Database::thread(self, thread_id)
    }

    fn thread_page(&self, board_id: BoardId, page: Page) -> Result<Vec<Thread>> {
        Database::thread_page(self, board_id, page)
    }

    fn thread_count(&self, board_id: BoardId) -> Result<i64> {
        Database::thread_count(self, board_id)
    }

    fn insert_thread(
        &self,
        thread: Thread,
        first: NewResponse,
    ) -> Result<Response> {
        Database::insert_thread(self, thread, first)
    }

    fn append_response(
        &self,
        board_id: BoardId,
        thread: ThreadRef,
        new_response: NewResponse,
        bump: bool,
    ) -> Result<(Thread, Response)> {
        Database::append_response(self, board_id, thread, new_response, bump)
    }

    fn responses(
        &self,
        thread_id: ThreadId,
        query: ResponseQuery,
    ) -> Result<Vec<Response>> {
        Database::responses(self, thread_id, query)
    }
}
