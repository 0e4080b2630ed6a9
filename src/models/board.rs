//! Types related to boards.

use diesel::{insert_into, prelude::*, update};

use serde::Serialize;

use uuid::Uuid;

use crate::models::*;
use crate::schema::board;
use crate::validate::{
    validate_board_name, validate_board_slug, validate_default_author_name,
    validate_local_rule, validate_max_content_length, ValidationErrors,
};
use crate::{Error, Result};

/// A collection of threads about a similar topic.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Insertable, Serialize)]
#[diesel(table_name = board)]
pub struct Board {
    pub id: BoardId,
    /// The unique short name used in paths, e.g. `news`.
    pub slug: String,
    /// The display name. May be empty.
    pub name: String,
    /// A one-line rule shown on the board.
    pub local_rule: String,
    /// The name given to posters who leave the name field empty.
    pub default_author_name: String,
    /// The longest response body the board accepts.
    pub max_content_length: i32,
    /// Where the board sorts in board lists.
    pub order_index: i32,
    /// Inactive boards are hidden from board lists.
    pub is_active: bool,
    /// Whether this is the board used when none is named.
    pub is_default: bool,
}

impl Board {
    /// Create a new active board, checking every setting.
    pub fn new(
        slug: &str,
        name: &str,
        local_rule: &str,
        default_author_name: &str,
        max_content_length: i64,
    ) -> Result<Board> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_board_slug(slug));
        errors.check(validate_board_name(name));
        errors.check(validate_local_rule(local_rule));
        errors.check(validate_default_author_name(default_author_name));
        errors.check(validate_max_content_length(max_content_length));
        errors.into_result()?;

        Ok(Board {
            id: Uuid::now_v7(),
            slug: slug.to_string(),
            name: name.to_string(),
            local_rule: local_rule.to_string(),
            default_author_name: default_author_name.to_string(),
            max_content_length: i32::try_from(max_content_length)
                .unwrap_or(i32::MAX),
            order_index: 0,
            is_active: true,
            is_default: false,
        })
    }

    /// The settings posting to this board is checked against.
    pub fn policy(&self) -> BoardPolicy {
        BoardPolicy {
            board_id: self.id,
            max_content_length: usize::try_from(self.max_content_length)
                .unwrap_or(0),
            default_author_name: self.default_author_name.clone(),
        }
    }
}

/// The parts of a board's settings that apply to a single post.
///
/// Read fresh from the store for every post; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardPolicy {
    pub board_id: BoardId,
    pub max_content_length: usize,
    pub default_author_name: String,
}

/// A page location for a paginated resource, for example a page of threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// The page number, starting at 1.
    pub num: u32,
    /// How many items can fit in a page.
    pub width: u32,
}

impl Page {
    /// The offset in items to the start of the page.
    ///
    /// The offset to page 1 is 0.
    pub fn offset(&self) -> u32 {
        self.num.saturating_sub(1).saturating_mul(self.width)
    }
}

/// Convenience function to convert from diesel's error type into our error
/// type, when we're querying for a board.
fn conv_board_error<S>(board: S) -> impl FnOnce(diesel::result::Error) -> Error
where
    S: Into<String>,
{
    move |e: diesel::result::Error| match e {
        diesel::result::Error::NotFound => Error::BoardNotFound {
            board: board.into(),
        },
        _ => Error::from(e),
    }
}

/// Check that a board exists and is active, and keep it that way until the
/// transaction on `conn` ends.
pub(crate) fn lock_active_board(
    conn: &mut PgConnection,
    board_id: BoardId,
) -> Result<()> {
    use crate::schema::board::columns::{id, is_active};
    use crate::schema::board::dsl::board;

    let _: BoardId = board
        .find(board_id)
        .filter(is_active.eq(true))
        .select(id)
        .for_share()
        .first(conn)
        .map_err(conv_board_error(board_id.to_string()))?;

    Ok(())
}

impl Database {
    /// Get a board by id.
    pub fn board(&self, board_id: BoardId) -> Result<Board> {
        use crate::schema::board::dsl::board;

        board
            .find(board_id)
            .first(&mut self.conn()?)
            .map_err(conv_board_error(board_id.to_string()))
    }

    /// Get an active board by slug.
    pub fn board_by_slug(&self, board_slug: &str) -> Result<Board> {
        use crate::schema::board::columns::{is_active, slug};
        use crate::schema::board::dsl::board;

        board
            .filter(slug.eq(board_slug))
            .filter(is_active.eq(true))
            .first(&mut self.conn()?)
            .map_err(conv_board_error(board_slug))
    }

    /// Get the default board. An inactive default board counts as none.
    pub fn default_board(&self) -> Result<Board> {
        use crate::schema::board::columns::{is_active, is_default};
        use crate::schema::board::dsl::board;

        board
            .filter(is_default.eq(true))
            .filter(is_active.eq(true))
            .first(&mut self.conn()?)
            .map_err(|e| match e {
                diesel::result::Error::NotFound => Error::NoDefaultBoard,
                _ => Error::from(e),
            })
    }

    /// Get all active boards.
    pub fn all_boards(&self) -> Result<Vec<Board>> {
        use crate::schema::board::columns::{is_active, order_index, slug};
        use crate::schema::board::dsl::board;

        Ok(board
            .filter(is_active.eq(true))
            .order((order_index.asc(), slug.asc()))
            .load(&mut self.conn()?)?)
    }

    /// Insert a new board.
    pub fn insert_board(&self, new_board: Board) -> Result<()> {
        use crate::schema::board::columns::{is_default, slug};
        use crate::schema::board::dsl::board;

        self.conn()?.transaction::<_, Error, _>(|conn| {
            let existing: i64 = board
                .filter(slug.eq(&new_board.slug))
                .count()
                .get_result(conn)?;

            if existing > 0 {
                return Err(Error::BoardExists {
                    slug: new_board.slug.clone(),
                });
            }

            if new_board.is_default {
                update(board.filter(is_default.eq(true)))
                    .set(is_default.eq(false))
                    .execute(conn)?;
            }

            insert_into(board).values(&new_board).execute(conn)?;

            Ok(())
        })
    }

    /// Make an active board the only default board.
    pub fn set_default_board(&self, board_id: BoardId) -> Result<()> {
        use crate::schema::board::columns::{id, is_active, is_default};
        use crate::schema::board::dsl::board;

        self.conn()?.transaction::<_, Error, _>(|conn| {
            let _: BoardId = board
                .find(board_id)
                .filter(is_active.eq(true))
                .select(id)
                .for_update()
                .first(conn)
                .map_err(conv_board_error(board_id.to_string()))?;

            update(board.filter(is_default.eq(true)))
                .set(is_default.eq(false))
                .execute(conn)?;

            update(board.find(board_id))
                .set(is_default.eq(true))
                .execute(conn)?;

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::validate::Field;

    #[test]
    fn new_board_checks_every_setting() {
        let err = Board::new("Bad Slug", &"n".repeat(51), "", "", 0)
            .unwrap_err();

        let errors = err.validation_errors().unwrap();
        for field in [
            Field::BoardSlug,
            Field::BoardName,
            Field::LocalRule,
            Field::DefaultAuthorName,
            Field::MaxContentLength,
        ] {
            assert!(errors.for_field(field).is_some(), "{} not checked", field);
        }
    }

    #[test]
    fn missing_board_maps_to_not_found() {
        let err = conv_board_error("news")(diesel::result::Error::NotFound);
        assert!(err.is_not_found());
        assert!(matches!(err, Error::BoardNotFound { ref board } if board == "news"));

        let err = conv_board_error("news")(
            diesel::result::Error::BrokenTransactionManager,
        );
        assert!(err.is_storage());
    }

    #[test]
    fn new_board() -> Result<()> {
        let board = Board::new("news", "", "Be nice.", "Anonymous", 2000)?;

        assert_eq!(board.slug, "news");
        assert!(board.is_active);
        assert!(!board.is_default);
        assert_eq!(
            board.policy(),
            BoardPolicy {
                board_id: board.id,
                max_content_length: 2000,
                default_author_name: "Anonymous".into(),
            }
        );

        Ok(())
    }

    #[test]
    fn huge_limit_saturates() -> Result<()> {
        let board = Board::new("big", "Big", "Rule", "Anon", i64::MAX)?;
        assert_eq!(board.max_content_length, i32::MAX);
        Ok(())
    }

    #[test]
    fn page_offset() {
        assert_eq!(Page { num: 1, width: 10 }.offset(), 0);
        assert_eq!(Page { num: 3, width: 10 }.offset(), 20);
        assert_eq!(Page { num: 0, width: 10 }.offset(), 0);
    }
}
