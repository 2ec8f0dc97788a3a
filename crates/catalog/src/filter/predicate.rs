//! Record predicates for the `filter` property of a filter file.
//!
//! A predicate is a boolean expression over record attributes:
//!
//! ```text
//! expression := conjunction ( "||" conjunction )*
//! conjunction := unary ( "&&" unary )*
//! unary      := "!" unary | "(" expression ")" | comparison | "true" | "false"
//! comparison := attribute operator operand
//! operator   := "==" | "!=" | "<" | "<=" | ">" | ">="
//!             | "contains" | "starts_with" | "ends_with"
//! operand    := '"' text '"' | "'" text "'" | integer
//! ```
//!
//! Text comparisons are case-insensitive. Text attributes only accept text
//! operands and numeric attributes only accept integers; the substring
//! operators only apply to text. Nothing outside this grammar is accepted.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser};
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};
use crate::models::BookRecord;

/// Record attribute a predicate can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Author,
    Genre,
    Title,
    Series,
    SeriesNo,
    File,
    Size,
    LibId,
    Deleted,
    Ext,
    Date,
    Lang,
    Rating,
    Keywords,
    Folder,
}

impl Attribute {
    fn is_numeric(&self) -> bool {
        matches!(self, Self::SeriesNo | Self::Size | Self::Deleted | Self::Rating)
    }

    fn text<'r>(&self, record: &'r BookRecord) -> Option<&'r str> {
        Some(match self {
            Self::Author => &record.author,
            Self::Genre => &record.genre,
            Self::Title => &record.title,
            Self::Series => &record.series,
            Self::File => &record.file,
            Self::LibId => &record.lib_id,
            Self::Ext => &record.ext,
            Self::Date => &record.date,
            Self::Lang => &record.lang,
            Self::Keywords => &record.keywords,
            Self::Folder => &record.folder,
            Self::SeriesNo | Self::Size | Self::Deleted | Self::Rating => return None,
        })
    }

    fn number(&self, record: &BookRecord) -> Option<i64> {
        match self {
            Self::SeriesNo => Some(record.series_no.map_or(0, i64::from)),
            Self::Size => Some(i64::try_from(record.size).unwrap_or(i64::MAX)),
            Self::Deleted => Some(i64::from(record.deleted)),
            Self::Rating => Some(i64::from(record.rating)),
            _ => None,
        }
    }
}

impl FromStr for Attribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "author" => Self::Author,
            "genre" => Self::Genre,
            "title" => Self::Title,
            "series" => Self::Series,
            "series_no" | "serno" => Self::SeriesNo,
            "file" => Self::File,
            "size" => Self::Size,
            "lib_id" | "libid" => Self::LibId,
            "deleted" | "del" => Self::Deleted,
            "ext" => Self::Ext,
            "date" => Self::Date,
            "lang" => Self::Lang,
            "rating" | "librate" => Self::Rating,
            "keywords" => Self::Keywords,
            "folder" => Self::Folder,
            _ => exn::bail!(ErrorKind::MalformedFilter(format!("unknown attribute: {s}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    fn is_substring(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }

    fn compare<T: Ord + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Contains | Self::StartsWith | Self::EndsWith => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Stored lower-cased.
    Text(String),
    Number(i64),
}

/// A compiled record predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Const(bool),
    Test {
        attribute: Attribute,
        operator: Operator,
        operand: Operand,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Parse and type-check a predicate expression.
    pub fn parse(source: &str) -> Result<Self> {
        let (_, predicate) = all_consuming(ws(|input| expression(input, 0)))
            .parse(source)
            .map_err(|err| Error::from(ErrorKind::MalformedFilter(format!("unable to parse predicate: {err}"))))?;
        predicate.check()?;
        Ok(predicate)
    }

    fn check(&self) -> Result<()> {
        match self {
            Self::Const(_) => Ok(()),
            Self::Not(inner) => inner.check(),
            Self::And(left, right) | Self::Or(left, right) => {
                left.check()?;
                right.check()
            },
            Self::Test { attribute, operator, operand } => {
                let valid = match operand {
                    Operand::Text(_) => !attribute.is_numeric(),
                    Operand::Number(_) => attribute.is_numeric() && !operator.is_substring(),
                };
                if !valid {
                    exn::bail!(ErrorKind::MalformedFilter(format!(
                        "{attribute:?} cannot be compared with {operand:?} using {operator:?}"
                    )));
                }
                Ok(())
            },
        }
    }

    pub fn matches(&self, record: &BookRecord) -> bool {
        match self {
            Self::Const(constant) => *constant,
            Self::Not(inner) => !inner.matches(record),
            Self::And(left, right) => left.matches(record) && right.matches(record),
            Self::Or(left, right) => left.matches(record) || right.matches(record),
            Self::Test { attribute, operator, operand } => match operand {
                Operand::Text(expected) => {
                    let Some(actual) = attribute.text(record) else {
                        return false;
                    };
                    let actual = actual.to_lowercase();
                    match operator {
                        Operator::Contains => actual.contains(expected.as_str()),
                        Operator::StartsWith => actual.starts_with(expected.as_str()),
                        Operator::EndsWith => actual.ends_with(expected.as_str()),
                        other => other.compare(actual.as_str(), expected.as_str()),
                    }
                },
                Operand::Number(expected) => {
                    attribute.number(record).is_some_and(|actual| operator.compare(&actual, expected))
                },
            },
        }
    }
}

// ======================================================================
// Grammar
// ======================================================================

/// Deepest accepted nesting of `!` and parentheses.
const MAX_NESTING: usize = 64;

fn ws<'a, P>(inner: P) -> impl Parser<&'a str, Output = P::Output, Error = P::Error>
where
    P: Parser<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn expression(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (input, first) = conjunction(input, depth)?;
    let (input, rest) = many0(preceded(tag("||"), |input| conjunction(input, depth))).parse(input)?;
    let predicate = rest.into_iter().fold(first, |left, right| Predicate::Or(Box::new(left), Box::new(right)));
    Ok((input, predicate))
}

fn conjunction(input: &str, depth: usize) -> IResult<&str, Predicate> {
    let (input, first) = unary(input, depth)?;
    let (input, rest) = many0(preceded(tag("&&"), |input| unary(input, depth))).parse(input)?;
    let predicate = rest.into_iter().fold(first, |left, right| Predicate::And(Box::new(left), Box::new(right)));
    Ok((input, predicate))
}

fn unary(input: &str, depth: usize) -> IResult<&str, Predicate> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::TooLarge)));
    }
    ws(alt((
        map(preceded(char('!'), |input| unary(input, depth + 1)), |inner| Predicate::Not(Box::new(inner))),
        delimited(char('('), |input| expression(input, depth + 1), char(')')),
        comparison,
        constant,
    )))
    .parse(input)
}

fn constant(input: &str) -> IResult<&str, Predicate> {
    alt((value(Predicate::Const(true), tag("true")), value(Predicate::Const(false), tag("false")))).parse(input)
}

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, attribute) = map_res(identifier, Attribute::from_str).parse(input)?;
    let (input, operator) = ws(operator).parse(input)?;
    let (input, operand) = operand(input)?;
    Ok((input, Predicate::Test { attribute, operator, operand }))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Eq, tag("==")),
        value(Operator::Ne, tag("!=")),
        value(Operator::Le, tag("<=")),
        value(Operator::Ge, tag(">=")),
        value(Operator::Lt, tag("<")),
        value(Operator::Gt, tag(">")),
        value(Operator::Contains, tag("contains")),
        value(Operator::StartsWith, tag("starts_with")),
        value(Operator::EndsWith, tag("ends_with")),
    ))
    .parse(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(quoted, |text: &str| Operand::Text(text.to_lowercase())),
        map_res(recognize(pair(opt(char('-')), digit1)), |digits: &str| digits.parse::<i64>().map(Operand::Number)),
    ))
    .parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('"'), take_while(|c: char| c != '"'), char('"')),
        delimited(char('\''), take_while(|c: char| c != '\''), char('\'')),
    ))
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn record() -> BookRecord {
        BookRecord {
            author: "Ivanov,Petrov".to_string(),
            genre: "sf_action,sf_space".to_string(),
            title: "Book A".to_string(),
            lang: "ru".to_string(),
            rating: 4,
            size: 1024,
            ..Default::default()
        }
    }

    #[rstest]
    #[case("true", true)]
    #[case("false", false)]
    #[case("lang == 'ru'", true)]
    #[case("lang == \"RU\"", true)]
    #[case("lang != 'ru'", false)]
    #[case("genre contains 'space'", true)]
    #[case("title starts_with 'book'", true)]
    #[case("title ends_with 'b'", false)]
    #[case("rating >= 4", true)]
    #[case("rating > 4", false)]
    #[case("size < 2048 && deleted == 0", true)]
    #[case("lang == 'en' || rating == 4", true)]
    #[case("!(lang == 'en') && !deleted == 1", true)]
    #[case("  ( author contains 'petrov' )  ", true)]
    #[case("lang == 'en' || lang == 'de' && rating == 4", false)]
    #[case("series == ''", true)]
    #[case("rating > -1", true)]
    fn test_matches(#[case] source: &str, #[case] expected: bool) {
        let predicate = Predicate::parse(source).unwrap();
        assert_eq!(predicate.matches(&record()), expected, "{source}");
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let predicate = Predicate::parse("true || false && false").unwrap();
        assert!(matches!(predicate, Predicate::Or(_, _)));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |depth: usize| format!("{}true{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(Predicate::parse(&nested(MAX_NESTING)).unwrap(), Predicate::Const(true));
        for source in [nested(10_000), format!("{}true", "!".repeat(10_000))] {
            let err = Predicate::parse(&source).unwrap_err();
            assert!(matches!(&*err, ErrorKind::MalformedFilter(_)));
        }
    }

    #[rstest]
    #[case("")]
    #[case("lang")]
    #[case("lang = 'ru'")]
    #[case("lang == ru")]
    #[case("unknown == 'x'")]
    #[case("lang == 'ru' &&")]
    #[case("(lang == 'ru'")]
    #[case("rec => rec.lang == 'ru'")]
    #[case("process.exit(1)")]
    #[case("rating == 'four'")]
    #[case("lang == 4")]
    #[case("rating contains 4")]
    fn test_rejects_anything_outside_grammar(#[case] source: &str) {
        let err = Predicate::parse(source).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedFilter(_)), "{source}");
    }
}
