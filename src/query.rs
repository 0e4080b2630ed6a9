//! Legacy response selectors, such as `l50` or `10-20`.
//!
//! Old clients select which responses of a thread to read with a short path
//! segment:
//!
//! | segment  | responses                               |
//! |----------|-----------------------------------------|
//! | (empty)  | all                                     |
//! | `l50`    | the first response and the latest 50    |
//! | `7`      | only number 7                           |
//! | `10-20`  | 10 through 20                           |
//! | `10-`    | 10 and everything after                 |
//! | `-20`    | everything up to 20                     |

use std::fmt;
use std::str::FromStr;

use combine::parser::char::*;
use combine::stream::position;
use combine::*;

use serde::Serialize;

use crate::address::validate_response_number;
use crate::models::{Response, ResponseNumber};
use crate::validate::{Field, Problem, ValidationError};

/// Which responses of a thread to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseQuery {
    All,
    /// The first response plus the latest `n`.
    Latest(u32),
    Single(ResponseNumber),
    /// An inclusive range. A missing end is unbounded.
    Range {
        from: Option<ResponseNumber>,
        to: Option<ResponseNumber>,
    },
}

/// A selector before its numbers are checked.
enum Selector {
    Latest(String),
    Single(String),
    Range(Option<String>, Option<String>),
}

fn digits<Input>() -> impl Parser<Input, Output = String>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    many1(digit())
}

/// Parse `l50`.
fn latest_parser<Input>() -> impl Parser<Input, Output = Selector>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    char('l').with(digits()).map(Selector::Latest)
}

/// Parse `-20`.
fn up_to_parser<Input>() -> impl Parser<Input, Output = Selector>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    char('-')
        .with(digits())
        .map(|to| Selector::Range(None, Some(to)))
}

/// Parse `7`, `10-20` or `10-`.
fn numbered_parser<Input>() -> impl Parser<Input, Output = Selector>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    (digits(), optional(char('-').with(optional(digits())))).map(
        |(from, rest)| match rest {
            None => Selector::Single(from),
            Some(to) => Selector::Range(Some(from), to),
        },
    )
}

fn selector_parser<Input>() -> impl Parser<Input, Output = Option<Selector>>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    optional(choice((latest_parser(), up_to_parser(), numbered_parser())))
        .skip(eof())
}

fn malformed() -> ValidationError {
    ValidationError::new(Field::ResponseQuery, Problem::Malformed)
}

fn number(digits: &str) -> Result<ResponseNumber, ValidationError> {
    let n: i64 = digits.parse().map_err(|_| malformed())?;
    validate_response_number(n)
}

/// Close an open range: a missing start is response 1, a missing end runs to
/// the last response.
pub(crate) fn range_bounds(
    from: Option<ResponseNumber>,
    to: Option<ResponseNumber>,
) -> (ResponseNumber, ResponseNumber) {
    (from.unwrap_or(1), to.unwrap_or(ResponseNumber::MAX))
}

impl ResponseQuery {
    /// Parse a legacy selector.
    pub fn parse(input: &str) -> Result<ResponseQuery, ValidationError> {
        let (selector, _input) = selector_parser()
            .easy_parse(position::Stream::new(input))
            .map_err(|_| malformed())?;

        let query = match selector {
            None => ResponseQuery::All,
            Some(Selector::Latest(n)) => {
                let n: u32 = n.parse().map_err(|_| malformed())?;
                if n == 0 {
                    return Err(ValidationError::new(
                        Field::ResponseQuery,
                        Problem::NotPositive,
                    ));
                }
                ResponseQuery::Latest(n)
            }
            Some(Selector::Single(n)) => ResponseQuery::Single(number(&n)?),
            Some(Selector::Range(from, to)) => {
                let from = from.as_deref().map(number).transpose()?;
                let to = to.as_deref().map(number).transpose()?;

                if let (Some(from), Some(to)) = (from, to) {
                    if from > to {
                        return Err(malformed());
                    }
                }

                ResponseQuery::Range { from, to }
            }
        };

        Ok(query)
    }

    /// Pick the selected responses out of a thread's responses, which must
    /// be in number order.
    pub fn select<'a>(&self, responses: &'a [Response]) -> Vec<&'a Response> {
        match *self {
            ResponseQuery::All => responses.iter().collect(),
            ResponseQuery::Single(n) => {
                responses.iter().filter(|r| r.number == n).collect()
            }
            ResponseQuery::Range { from, to } => {
                let (from, to) = range_bounds(from, to);

                responses
                    .iter()
                    .filter(|r| from <= r.number && r.number <= to)
                    .collect()
            }
            ResponseQuery::Latest(n) => {
                let start = responses.len().saturating_sub(n as usize);

                let mut selected: Vec<&Response> = responses[..start]
                    .iter()
                    .filter(|r| r.number == 1)
                    .collect();
                selected.extend(&responses[start..]);
                selected
            }
        }
    }
}

impl FromStr for ResponseQuery {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<ResponseQuery, ValidationError> {
        ResponseQuery::parse(s)
    }
}

impl Default for ResponseQuery {
    fn default() -> ResponseQuery {
        ResponseQuery::All
    }
}

impl fmt::Display for ResponseQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseQuery::All => Ok(()),
            ResponseQuery::Latest(n) => write!(f, "l{}", n),
            ResponseQuery::Single(n) => write!(f, "{}", n),
            ResponseQuery::Range { from, to } => {
                if let Some(from) = from {
                    write!(f, "{}", from)?;
                }
                f.write_str("-")?;
                if let Some(to) = to {
                    write!(f, "{}", to)?;
                }
                Ok(())
            }
        }
    }
}
