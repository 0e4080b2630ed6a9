//! Types related to responses.

use chrono::offset::Utc;
use chrono::DateTime;

use diesel::dsl::max;
use diesel::{insert_into, prelude::*, update};

use serde::Serialize;

use crate::ident::{AuthorName, HashId};
use crate::models::board::lock_active_board;
use crate::models::thread::{conv_thread_error, resolve_thread_in};
use crate::models::*;
use crate::parse::ResponseBody;
use crate::query::{range_bounds, ResponseQuery};
use crate::schema::response;
use crate::{Error, Result};

/// A response in a thread. The first response of a thread is number 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub id: ResponseId,
    pub thread_id: ThreadId,
    pub number: ResponseNumber,
    pub author: AuthorName,
    /// The raw mail field, possibly `sage`.
    pub mail: String,
    /// The raw text of the response.
    pub content: String,
    pub hash_id: HashId,
    pub posted_at: DateTime<Utc>,
}

impl Response {
    /// Render the response's text.
    pub fn body(&self) -> ResponseBody {
        ResponseBody::parse(self.thread_id, &self.content)
    }
}

/// A response that hasn't been given a number yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponse {
    pub id: ResponseId,
    pub author: AuthorName,
    pub mail: String,
    pub content: String,
    pub hash_id: HashId,
    pub posted_at: DateTime<Utc>,
}

impl NewResponse {
    /// Place the response in a thread under the given number.
    pub fn numbered(
        self,
        thread_id: ThreadId,
        number: ResponseNumber,
    ) -> Response {
        Response {
            id: self.id,
            thread_id,
            number,
            author: self.author,
            mail: self.mail,
            content: self.content,
            hash_id: self.hash_id,
            posted_at: self.posted_at,
        }
    }
}

/// A response as it's stored in the database.
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = response)]
pub(crate) struct ResponseRow {
    id: ResponseId,
    thread_id: ThreadId,
    response_number: ResponseNumber,
    author_name: String,
    trip: Option<String>,
    mail: String,
    content: String,
    hash_id: String,
    posted_at: DateTime<Utc>,
}

impl From<&Response> for ResponseRow {
    fn from(r: &Response) -> ResponseRow {
        ResponseRow {
            id: r.id,
            thread_id: r.thread_id,
            response_number: r.number,
            author_name: r.author.name().to_string(),
            trip: r.author.trip().map(|trip| trip.as_str().to_string()),
            mail: r.mail.clone(),
            content: r.content.clone(),
            hash_id: r.hash_id.as_str().to_string(),
            posted_at: r.posted_at,
        }
    }
}

impl From<ResponseRow> for Response {
    fn from(row: ResponseRow) -> Response {
        Response {
            id: row.id,
            thread_id: row.thread_id,
            number: row.response_number,
            author: AuthorName::from_parts(row.author_name, row.trip),
            mail: row.mail,
            content: row.content,
            hash_id: HashId::from_stored(row.hash_id),
            posted_at: row.posted_at,
        }
    }
}

/// Put the newest rows of a thread, newest first, back in number order, with
/// response 1 in front. `load_first` is only called when response 1 isn't
/// among the newest rows.
fn latest_with_first<F>(
    mut newest: Vec<ResponseRow>,
    load_first: F,
) -> Result<Vec<ResponseRow>>
where
    F: FnOnce() -> Result<Vec<ResponseRow>>,
{
    newest.reverse();

    if newest.first().map(|row| row.response_number) != Some(1) {
        newest.splice(0..0, load_first()?);
    }

    Ok(newest)
}

impl Database {
    /// Append a response to a thread, numbering it `max + 1`.
    ///
    /// The board row is share-locked and the thread row is locked for the
    /// rest of the transaction, so concurrent appends to the same thread take
    /// turns. The unique `(thread_id, response_number)` index rejects
    /// anything that slips past. Returns the thread as this transaction left
    /// it.
    pub fn append_response(
        &self,
        board_id: BoardId,
        thread_ref: ThreadRef,
        new_response: NewResponse,
        bump: bool,
    ) -> Result<(Thread, Response)> {
        use crate::schema::response::columns as response_columns;
        use crate::schema::response::dsl::response;
        use crate::schema::thread::columns as thread_columns;
        use crate::schema::thread::dsl::thread;

        self.conn()?.transaction::<_, Error, _>(|conn| {
            lock_active_board(conn, board_id)?;
            let thread_id = resolve_thread_in(conn, board_id, thread_ref)?;

            let mut locked: Thread = thread
                .find(thread_id)
                .for_update()
                .first(conn)
                .map_err(conv_thread_error(thread_ref))?;

            let last: Option<ResponseNumber> = response
                .filter(response_columns::thread_id.eq(thread_id))
                .select(max(response_columns::response_number))
                .first(conn)?;

            let posted = new_response.numbered(thread_id, last.unwrap_or(0) + 1);

            insert_into(response)
                .values(&ResponseRow::from(&posted))
                .execute(conn)?;

            if bump && locked.bump_to(posted.posted_at) {
                update(thread.find(thread_id))
                    .set(thread_columns::updated_at.eq(locked.updated_at))
                    .execute(conn)?;
            }

            Ok((locked, posted))
        })
    }

    /// Get responses of a thread.
    pub fn responses(
        &self,
        thread_id: ThreadId,
        query: ResponseQuery,
    ) -> Result<Vec<Response>> {
        use crate::schema::response::columns::{
            response_number, thread_id as response_thread,
        };
        use crate::schema::response::dsl::response;
        use crate::schema::thread::dsl::thread;

        self.conn()?.transaction::<_, Error, _>(|conn| {
            let _: Thread = thread
                .find(thread_id)
                .first(conn)
                .map_err(conv_thread_error(thread_id.into()))?;

            let in_thread = response.filter(response_thread.eq(thread_id));

            let rows: Vec<ResponseRow> = match query {
                ResponseQuery::All => {
                    in_thread.order(response_number.asc()).load(conn)?
                }
                ResponseQuery::Single(number) => in_thread
                    .filter(response_number.eq(number))
                    .load(conn)?,
                ResponseQuery::Range { from, to } => {
                    let (from, to) = range_bounds(from, to);
                    in_thread
                        .filter(response_number.ge(from))
                        .filter(response_number.le(to))
                        .order(response_number.asc())
                        .load(conn)?
                }
                ResponseQuery::Latest(count) => {
                    let newest: Vec<ResponseRow> = in_thread
                        .clone()
                        .order(response_number.desc())
                        .limit(count.into())
                        .load(conn)?;

                    latest_with_first(newest, || {
                        Ok(in_thread
                            .filter(response_number.eq(1))
                            .load(conn)?)
                    })?
                }
            };

            Ok(rows.into_iter().map(Response::from).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::address::{new_response_id, new_thread_id};

    use crate::ident::{create_hash_id, derive_trip};

    fn row(thread_id: ThreadId, number: ResponseNumber) -> ResponseRow {
        ResponseRow::from(&Response {
            id: new_response_id(),
            thread_id,
            number,
            author: AuthorName::Bare {
                name: "Anonymous".into(),
            },
            mail: String::new(),
            content: format!("response {}", number),
            hash_id: create_hash_id("abcdefgh").unwrap(),
            posted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        })
    }

    fn numbers(rows: &[ResponseRow]) -> Vec<ResponseNumber> {
        rows.iter().map(|row| row.response_number).collect()
    }

    #[test]
    fn latest_puts_the_first_response_in_front() -> Result<()> {
        let thread_id = new_thread_id();
        let newest = vec![row(thread_id, 10), row(thread_id, 9), row(thread_id, 8)];

        let rows = latest_with_first(newest, || Ok(vec![row(thread_id, 1)]))?;
        assert_eq!(numbers(&rows), vec![1, 8, 9, 10]);

        Ok(())
    }

    #[test]
    fn latest_skips_loading_a_first_it_has() -> Result<()> {
        let thread_id = new_thread_id();
        let newest = vec![row(thread_id, 2), row(thread_id, 1)];

        let rows = latest_with_first(newest, || {
            panic!("response 1 was already loaded")
        })?;
        assert_eq!(numbers(&rows), vec![1, 2]);

        Ok(())
    }

    #[test]
    fn latest_passes_load_errors_on() {
        let thread_id = new_thread_id();
        let err = latest_with_first(vec![row(thread_id, 5)], || {
            Err(Error::StoreLockPoisoned)
        })
        .unwrap_err();

        assert!(err.is_storage());
    }

    #[test]
    fn rows_keep_the_author() {
        let thread_id = new_thread_id();
        let mut response = Response::from(row(thread_id, 3));
        response.author = AuthorName::Tripped {
            name: "lain".into(),
            trip: derive_trip("navi"),
        };
        response.mail = "sage".into();

        let stored = ResponseRow::from(&response);
        assert_eq!(stored.author_name, "lain");
        assert_eq!(stored.trip.as_deref(), Some(derive_trip("navi").as_str()));
        assert_eq!(stored.hash_id, "abcdefgh");

        assert_eq!(Response::from(stored), response);
    }

    #[test]
    fn missing_thread_maps_to_not_found() {
        let err = conv_thread_error(ThreadRef::Epoch(7))(
            diesel::result::Error::NotFound,
        );
        assert!(matches!(
            err,
            Error::ThreadNotFound {
                thread: ThreadRef::Epoch(7)
            }
        ));

        let err = conv_thread_error(ThreadRef::Epoch(7))(
            diesel::result::Error::RollbackTransaction,
        );
        assert!(err.is_storage());
    }
}
