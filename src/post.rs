//! Creating threads and replies.

use chrono::{DateTime, Utc};

use log::{debug, info, warn};

use serde::Serialize;

use crate::address::{epoch_id_for, new_response_id, new_thread_id};
use crate::ident::{hash_identity, parse_author_name, AuthorName};
use crate::models::{
    BoardPolicy, NewResponse, Response, Store, Thread, ThreadRef,
};
use crate::validate::{
    validate_content, validate_mail, validate_title, Content, Mail,
    ValidationErrors,
};
use crate::{Error, Result};

/// The fields a poster filled in, as submitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostForm<'a> {
    /// The name field, possibly with a `#trip` key.
    pub author: Option<&'a str>,
    pub mail: Option<&'a str>,
    pub content: &'a str,
    /// The poster's address, as resolved by the transport.
    pub ip: &'a str,
}

/// The outcome of a successful post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Posted {
    /// The thread as it is after the post.
    pub thread: Thread,
    pub response: Response,
    /// Whether the post moved the thread's `updated_at`.
    pub bumped: bool,
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Creates threads and replies on a [Store].
pub struct Poster<'s, S: ?Sized> {
    store: &'s S,
    clock: Clock,
}

/// The checked fields shared by threads and replies.
struct Checked {
    author: AuthorName,
    mail: Mail,
    content: Content,
}

fn check_fields(
    errors: &mut ValidationErrors,
    policy: &BoardPolicy,
    form: &PostForm,
) -> Option<Checked> {
    let author = errors.check(parse_author_name(
        form.author,
        &policy.default_author_name,
    ));
    let mail = errors.check(validate_mail(form.mail));
    let content =
        errors.check(validate_content(form.content, policy.max_content_length));

    Some(Checked {
        author: author?,
        mail: mail?,
        content: content?,
    })
}

fn rejected(errors: ValidationErrors) -> Error {
    warn!("Rejected post: {}", errors.to_string().replace('\n', "; "));
    Error::from(errors)
}

impl<'s, S> Poster<'s, S>
where
    S: Store + ?Sized,
{
    pub fn new(store: &'s S) -> Poster<'s, S> {
        Poster {
            store,
            clock: Box::new(Utc::now),
        }
    }

    /// Use a different source of the current time.
    pub fn with_clock<F>(mut self, clock: F) -> Poster<'s, S>
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    fn new_response(&self, checked: Checked, ip: &str) -> NewResponse {
        let posted_at = (self.clock)();
        let hash_id = hash_identity(ip, posted_at.date_naive());

        debug!("Poster got hash id {}", hash_id);

        NewResponse {
            id: new_response_id(),
            author: checked.author,
            mail: checked.mail.into_inner(),
            content: checked.content.into_inner(),
            hash_id,
            posted_at,
        }
    }

    /// Create a thread and its first response.
    ///
    /// Every field is checked before anything is written, and all failing
    /// fields are reported together.
    pub fn post_new_thread(
        &self,
        policy: &BoardPolicy,
        title: &str,
        form: &PostForm,
    ) -> Result<Posted> {
        info!("New thread on board {}", policy.board_id);

        let mut errors = ValidationErrors::new();
        let title = errors.check(validate_title(title));
        let checked = check_fields(&mut errors, policy, form);

        let (title, checked) = match (title, checked) {
            (Some(title), Some(checked)) if errors.is_empty() => {
                (title, checked)
            }
            _ => return Err(rejected(errors)),
        };

        let first = self.new_response(checked, form.ip);
        let thread = Thread {
            id: new_thread_id(),
            epoch_id: epoch_id_for(first.posted_at),
            title: title.into_inner(),
            posted_at: first.posted_at,
            updated_at: first.posted_at,
            board_id: policy.board_id,
        };

        let response = self.store.insert_thread(thread.clone(), first)?;

        info!(
            "Created thread {} (epoch {}) on board {}",
            thread.id, thread.epoch_id, thread.board_id
        );

        Ok(Posted {
            thread,
            response,
            bumped: true,
        })
    }

    /// Reply to a thread, given by id or by epoch id.
    ///
    /// The reply bumps the thread unless its mail field is `sage`.
    pub fn post_reply(
        &self,
        policy: &BoardPolicy,
        thread: ThreadRef,
        form: &PostForm,
    ) -> Result<Posted> {
        info!("Reply to thread {} on board {}", thread, policy.board_id);

        let mut errors = ValidationErrors::new();
        let checked = match check_fields(&mut errors, policy, form) {
            Some(checked) if errors.is_empty() => checked,
            _ => return Err(rejected(errors)),
        };

        let bump = !checked.mail.is_sage();
        let new_response = self.new_response(checked, form.ip);

        let (thread, response) = self.store.append_response(
            policy.board_id,
            thread,
            new_response,
            bump,
        )?;

        info!(
            "Posted response {} to thread {}{}",
            response.number,
            thread.id,
            if bump { "" } else { " (sage)" }
        );

        Ok(Posted {
            thread,
            response,
            bumped: bump,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::{Duration, TimeZone};

    use crate::ident::derive_trip;
    use crate::models::{Board, MemoryStore};
    use crate::validate::{Field, Problem};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    /// A clock that moves forward one second every time it's read.
    fn ticking_clock() -> impl Fn() -> DateTime<Utc> + Send + Sync {
        let ticks = AtomicI64::new(0);
        move || start() + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst))
    }

    fn setup() -> (MemoryStore, Board) {
        let store = MemoryStore::new();
        let board = Board::new("news", "News", "Be nice.", "Anonymous", 200)
            .unwrap();
        store.insert_board(board.clone()).unwrap();
        (store, board)
    }

    fn form(content: &str) -> PostForm {
        PostForm {
            author: None,
            mail: None,
            content,
            ip: "192.0.2.1",
        }
    }

    #[test]
    fn new_thread() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());

        let posted =
            poster.post_new_thread(&board.policy(), "Hello", &form("first!"))?;

        assert_eq!(posted.response.number, 1);
        assert_eq!(posted.thread.title, "Hello");
        assert_eq!(posted.thread.epoch_id, 1_714_564_800);
        assert_eq!(posted.thread.posted_at, start());
        assert_eq!(posted.thread.updated_at, posted.thread.posted_at);
        assert_eq!(posted.response.posted_at, posted.thread.posted_at);
        assert_eq!(
            posted.response.author,
            AuthorName::Bare {
                name: "Anonymous".into()
            }
        );
        assert_eq!(
            posted.response.hash_id,
            hash_identity("192.0.2.1", start().date_naive())
        );
        assert_eq!(store.thread(posted.thread.id)?, posted.thread);

        Ok(())
    }

    #[test]
    fn every_bad_field_is_reported() {
        let (store, board) = setup();
        let poster = Poster::new(&store);

        let name = "n".repeat(101);
        let content = "c".repeat(201);
        let bad = PostForm {
            author: Some(&name),
            mail: Some("not mail"),
            content: &content,
            ip: "192.0.2.1",
        };
        let err = poster
            .post_new_thread(&board.policy(), "<script>", &bad)
            .unwrap_err();

        assert!(err.is_invalid());
        let errors = err.validation_errors().unwrap();
        assert_eq!(errors.iter().count(), 4);
        assert_eq!(
            errors.for_field(Field::Content).unwrap().problem,
            Problem::TooLong { max: 200 }
        );
        assert!(errors.for_field(Field::Title).is_some());
        assert!(errors.for_field(Field::Mail).is_some());
        assert!(errors.for_field(Field::AuthorName).is_some());

        assert_eq!(store.thread_count(board.id).unwrap(), 0);
    }

    #[test]
    fn content_limit_comes_from_the_policy() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store);
        let long = "x".repeat(300);

        assert!(poster
            .post_new_thread(&board.policy(), "t", &form(&long))
            .unwrap_err()
            .is_invalid());

        let mut policy = board.policy();
        policy.max_content_length = 300;
        poster.post_new_thread(&policy, "t", &form(&long))?;

        Ok(())
    }

    #[test]
    fn tripped_author() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store);

        let posted = poster.post_new_thread(
            &board.policy(),
            "t",
            &PostForm {
                author: Some("lain#navi"),
                ..form("hi")
            },
        )?;

        assert_eq!(
            posted.response.author,
            AuthorName::Tripped {
                name: "lain".into(),
                trip: derive_trip("navi"),
            }
        );

        Ok(())
    }

    #[test]
    fn replies_are_numbered_in_order() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;

        for expected in 2..=5 {
            let posted =
                poster.post_reply(&policy, thread.id.into(), &form("reply"))?;
            assert_eq!(posted.response.number, expected);
            assert_eq!(posted.response.thread_id, thread.id);
        }

        Ok(())
    }

    #[test]
    fn reply_by_epoch_id() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;
        let key = ThreadRef::from_legacy_key("1714564800.dat")?;

        let posted = poster.post_reply(&policy, key, &form("legacy"))?;
        assert_eq!(posted.response.thread_id, thread.id);
        assert_eq!(posted.response.number, 2);

        Ok(())
    }

    #[test]
    fn sage_does_not_bump() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;

        for mail in ["sage", "SAGE", "SaGe"] {
            let posted = poster.post_reply(
                &policy,
                thread.id.into(),
                &PostForm {
                    mail: Some(mail),
                    ..form("quiet")
                },
            )?;

            assert!(!posted.bumped);
            assert_eq!(posted.thread.updated_at, thread.updated_at);
            assert!(posted.response.posted_at > thread.updated_at);
        }

        Ok(())
    }

    #[test]
    fn other_mail_bumps() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;

        for mail in [None, Some(""), Some("anon@example.com")] {
            let posted = poster.post_reply(
                &policy,
                thread.id.into(),
                &PostForm {
                    mail,
                    ..form("loud")
                },
            )?;

            assert!(posted.bumped);
            assert_eq!(posted.thread.updated_at, posted.response.posted_at);
        }

        Ok(())
    }

    #[test]
    fn inactive_board_takes_no_posts() -> Result<()> {
        let store = MemoryStore::new();
        let mut dead = Board::new("dead", "Dead", "Gone.", "Anonymous", 200)?;
        dead.is_active = false;
        dead.is_default = true;
        store.insert_board(dead.clone())?;

        assert!(store.board_by_slug("dead").unwrap_err().is_not_found());
        assert!(store.default_board().unwrap_err().is_not_found());

        let poster = Poster::new(&store);
        let err = poster
            .post_new_thread(&dead.policy(), "t", &form("hello?"))
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_storage());

        let err = poster
            .post_reply(&dead.policy(), ThreadRef::Epoch(42), &form("hello?"))
            .unwrap_err();
        assert!(err.is_not_found());

        Ok(())
    }

    #[test]
    fn post_on_unknown_board() {
        let store = MemoryStore::new();
        let (_, board) = setup();
        let poster = Poster::new(&store);

        let err = poster
            .post_new_thread(&board.policy(), "t", &form("nobody home"))
            .unwrap_err();
        assert!(matches!(err, Error::BoardNotFound { .. }));
    }

    #[test]
    fn reply_returns_the_thread_it_left() -> Result<()> {
        let (store, board) = setup();
        let poster = Poster::new(&store).with_clock(ticking_clock());
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;
        let posted =
            poster.post_reply(&policy, thread.id.into(), &form("bump"))?;

        assert_eq!(posted.thread.updated_at, posted.response.posted_at);
        assert_eq!(store.thread(thread.id)?, posted.thread);

        Ok(())
    }

    #[test]
    fn reply_to_missing_thread() {
        let (store, board) = setup();
        let poster = Poster::new(&store);

        let err = poster
            .post_reply(&board.policy(), ThreadRef::Epoch(42), &form("hello?"))
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_storage());
    }

    #[test]
    fn invalid_reply_is_rejected_before_lookup() {
        let (store, board) = setup();
        let poster = Poster::new(&store);

        let err = poster
            .post_reply(&board.policy(), ThreadRef::Epoch(42), &form(""))
            .unwrap_err();

        assert!(err.is_invalid());
    }

    #[test]
    fn concurrent_replies_get_consecutive_numbers() -> Result<()> {
        const THREADS: usize = 8;
        const REPLIES: usize = 25;

        let (store, board) = setup();
        let poster = Poster::new(&store);
        let policy = board.policy();

        let thread = poster.post_new_thread(&policy, "t", &form("op"))?.thread;
        for _ in 0..3 {
            poster.post_reply(&policy, thread.id.into(), &form("warmup"))?;
        }
        let k = 4;

        let numbers: Vec<i32> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        (0..REPLIES)
                            .map(|_| {
                                poster
                                    .post_reply(
                                        &policy,
                                        thread.id.into(),
                                        &form("race"),
                                    )
                                    .map(|posted| posted.response.number)
                            })
                            .collect::<Result<Vec<i32>>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap().unwrap())
                .collect()
        });

        let n = (THREADS * REPLIES) as i32;
        assert_eq!(numbers.len(), n as usize);

        let unique: BTreeSet<i32> = numbers.into_iter().collect();
        let expected: BTreeSet<i32> = (k + 1..=k + n).collect();
        assert_eq!(unique, expected);

        Ok(())
    }

    /// Needs a scratch PostgreSQL database in `DATABASE_URL`.
    #[test]
    #[ignore]
    fn postgres_concurrent_replies() -> Result<()> {
        use crate::models::Database;

        const THREADS: usize = 8;
        const REPLIES: usize = 10;

        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for this test");
        let db = Database::open(url, THREADS as u32 + 2)?;

        let slug = format!("test-{}", new_thread_id().simple());
        let board = Board::new(&slug, "Test", "Rule", "Anonymous", 1000)?;
        db.insert_board(board.clone())?;
        let policy = board.policy();

        let poster = Poster::new(&db);
        let posted = poster.post_new_thread(&policy, "t", &form("op"))?;
        let thread = posted.thread;

        let by_epoch = db.resolve_thread(board.id, ThreadRef::Epoch(thread.epoch_id))?;
        assert_eq!(by_epoch, thread.id);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..REPLIES {
                        poster
                            .post_reply(&policy, thread.id.into(), &form("race"))
                            .unwrap();
                    }
                });
            }
        });

        let numbers: Vec<i32> = db
            .responses(thread.id, crate::query::ResponseQuery::All)?
            .iter()
            .map(|r| r.number)
            .collect();
        let expected: Vec<i32> = (1..=(THREADS * REPLIES) as i32 + 1).collect();
        assert_eq!(numbers, expected);

        let sage = poster.post_reply(
            &policy,
            thread.id.into(),
            &PostForm {
                mail: Some("sage"),
                ..form("quiet")
            },
        )?;
        let before = db.thread(thread.id)?.updated_at;
        assert!(!sage.bumped);
        assert_eq!(sage.thread.updated_at, before);

        let unknown = Board::new("unknown", "Unknown", "Rule", "Anonymous", 10)?;
        let err = poster
            .post_new_thread(&unknown.policy(), "t", &form("hello?"))
            .unwrap_err();
        assert!(matches!(err, Error::BoardNotFound { .. }));
        assert!(!err.is_storage());

        let dead_slug = format!("dead-{}", new_thread_id().simple());
        let mut dead = Board::new(&dead_slug, "Dead", "Rule", "Anonymous", 10)?;
        dead.is_active = false;
        db.insert_board(dead.clone())?;
        assert!(db.board_by_slug(&dead_slug).unwrap_err().is_not_found());
        assert!(poster
            .post_new_thread(&dead.policy(), "t", &form("hello?"))
            .unwrap_err()
            .is_not_found());

        Ok(())
    }
}
