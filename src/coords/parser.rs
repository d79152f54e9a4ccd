//! Recogniser for focus/filter/query command strings.
//!
//! Grammar (selectors in any order, each at most once):
//!
//! ```text
//! cmd      = selector *(WSP selector)
//! selector = ("device"|"sm"|"warp"|"lane"|"kernel"|"grid") [value]
//!          | ("block"|"thread") dim3
//! value    = uint | "current" | "any" | "*"
//! dim3     = "(" uint "," uint "," uint ")"
//! ```
//!
//! A string whose selectors all lack values is a query; anything else is a
//! switch request or a filter, depending on what the call site accepts.
//! Parsing is pure classification; no side-effects, no state access.

use crate::api::CuDim3;
use crate::coords::{CoordValue, Coords};
use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Command kinds a call site is willing to accept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AcceptedKinds: u8 {
        const SWITCH = 1 << 0;
        const QUERY = 1 << 1;
        const FILTER = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Switch,
    Query,
    Filter,
}

/// Which cells unspecified selectors default to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnspecifiedDefault {
    Wildcard,
    Current,
}

/// Outcome of a successful parse.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub kind: CommandKind,
    /// The full request tuple, defaults applied.
    pub coords: Coords,
    /// Only the cells the user pinned to a concrete value; everything else
    /// wildcard. Used to validate a resolved focus against the request.
    pub explicit: Coords,
    /// True when any physical selector (device/sm/warp/lane) appeared.
    pub physical_selector: bool,
}

// ===============================================================================================
// Lexer
// ===============================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Num(u64),
    Star,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                out.push(Token::LParen);
            }
            ')' => {
                chars.next();
                out.push(Token::RParen);
            }
            ',' => {
                chars.next();
                out.push(Token::Comma);
            }
            '*' => {
                chars.next();
                out.push(Token::Star);
            }
            c if c.is_ascii_digit() => {
                let mut n: u64 = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                    n = n
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(u64::from(d)))
                        .ok_or_else(|| Error::InvalidFilter(input.to_string()))?;
                    chars.next();
                }
                out.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push(Token::Ident(word));
            }
            _ => return Err(Error::InvalidFilter(format!("unexpected character '{c}'"))),
        }
    }
    Ok(out)
}

// ===============================================================================================
// Parser
// ===============================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selector {
    Device,
    Sm,
    Warp,
    Lane,
    Kernel,
    Grid,
    Block,
    Thread,
}

impl Selector {
    fn from_word(w: &str) -> Option<Self> {
        match w {
            "device" => Some(Self::Device),
            "sm" => Some(Self::Sm),
            "warp" => Some(Self::Warp),
            "lane" => Some(Self::Lane),
            "kernel" => Some(Self::Kernel),
            "grid" => Some(Self::Grid),
            "block" => Some(Self::Block),
            "thread" => Some(Self::Thread),
            _ => None,
        }
    }

    fn is_physical(self) -> bool {
        matches!(self, Self::Device | Self::Sm | Self::Warp | Self::Lane)
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        match self.next() {
            Some(ref t) if t == want => Ok(()),
            other => Err(Error::InvalidFilter(format!("expected {want:?}, found {other:?}"))),
        }
    }

    fn uint(&mut self) -> Result<u64> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            other => Err(Error::InvalidFilter(format!("expected a number, found {other:?}"))),
        }
    }

    fn dim3(&mut self) -> Result<CuDim3> {
        self.expect(&Token::LParen)?;
        let x = self.uint()?;
        self.expect(&Token::Comma)?;
        let y = self.uint()?;
        self.expect(&Token::Comma)?;
        let z = self.uint()?;
        self.expect(&Token::RParen)?;
        let narrow = |n: u64| -> Result<u32> {
            u32::try_from(n).map_err(|_| Error::InvalidFilter(format!("index {n} out of range")))
        };
        Ok(CuDim3::new(narrow(x)?, narrow(y)?, narrow(z)?))
    }

    /// Optional scalar value following a selector keyword.
    fn scalar_value(&mut self) -> Result<Option<CoordValue<u64>>> {
        enum Next {
            Num,
            Wild,
            Current,
            None,
        }
        let next = match self.peek() {
            Some(Token::Num(_)) => Next::Num,
            Some(Token::Star) => Next::Wild,
            Some(Token::Ident(w)) if w == "any" => Next::Wild,
            Some(Token::Ident(w)) if w == "current" => Next::Current,
            _ => Next::None,
        };
        match next {
            Next::Num => Ok(Some(CoordValue::Val(self.uint()?))),
            Next::Wild => {
                self.next();
                Ok(Some(CoordValue::Wildcard))
            }
            Next::Current => {
                self.next();
                Ok(Some(CoordValue::Current))
            }
            Next::None => Ok(None),
        }
    }
}

fn narrow32(cell: CoordValue<u64>) -> Result<CoordValue<u32>> {
    Ok(match cell {
        CoordValue::Val(v) => CoordValue::Val(
            u32::try_from(v).map_err(|_| Error::InvalidFilter(format!("index {v} out of range")))?,
        ),
        CoordValue::Wildcard => CoordValue::Wildcard,
        CoordValue::Current => CoordValue::Current,
        CoordValue::Invalid => CoordValue::Invalid,
    })
}

/// Parses `input` and classifies it against `accepted`.
///
/// Unspecified cells default per `default`; a request made only of bare
/// selectors classifies as a query when the call site accepts one.
pub fn parse(
    input: &str,
    accepted: AcceptedKinds,
    default: UnspecifiedDefault,
) -> Result<ParsedRequest> {
    let mut coords = match default {
        UnspecifiedDefault::Wildcard => Coords::wildcard(),
        UnspecifiedDefault::Current => Coords::current(),
    };
    let mut explicit = Coords::wildcard();

    let mut parser = Parser {
        tokens: lex(input)?,
        pos: 0,
    };

    let mut seen: Vec<Selector> = Vec::new();
    let mut any_value = false;
    let mut physical_selector = false;

    while let Some(token) = parser.next() {
        let word = match token {
            Token::Ident(w) => w,
            other => {
                return Err(Error::InvalidFilter(format!("expected a selector, found {other:?}")));
            }
        };
        let sel = Selector::from_word(&word)
            .ok_or_else(|| Error::InvalidFilter(format!("unknown selector '{word}'")))?;
        if seen.contains(&sel) {
            return Err(Error::InvalidFilter(format!("duplicate selector '{word}'")));
        }
        seen.push(sel);
        physical_selector |= sel.is_physical();

        match sel {
            Selector::Block | Selector::Thread => {
                let value = if matches!(parser.peek(), Some(Token::LParen)) {
                    any_value = true;
                    Some(parser.dim3()?)
                } else {
                    None
                };
                let cell = value.map_or(CoordValue::Current, CoordValue::Val);
                if sel == Selector::Block {
                    coords.block_idx = cell;
                    if let Some(d) = value {
                        explicit.block_idx = CoordValue::Val(d);
                    }
                } else {
                    coords.thread_idx = cell;
                    if let Some(d) = value {
                        explicit.thread_idx = CoordValue::Val(d);
                    }
                }
            }
            _ => {
                let value = parser.scalar_value()?;
                any_value |= value.is_some();
                // A bare selector names the cell without pinning it.
                let cell = value.unwrap_or(CoordValue::Current);
                let pinned = |c: CoordValue<u32>| match c {
                    CoordValue::Val(v) => CoordValue::Val(v),
                    _ => CoordValue::Wildcard,
                };
                let pinned64 = |c: CoordValue<u64>| match c {
                    CoordValue::Val(v) => CoordValue::Val(v),
                    _ => CoordValue::Wildcard,
                };
                match sel {
                    Selector::Device => {
                        coords.dev = narrow32(cell)?;
                        explicit.dev = pinned(coords.dev);
                    }
                    Selector::Sm => {
                        coords.sm = narrow32(cell)?;
                        explicit.sm = pinned(coords.sm);
                    }
                    Selector::Warp => {
                        coords.wp = narrow32(cell)?;
                        explicit.wp = pinned(coords.wp);
                    }
                    Selector::Lane => {
                        coords.ln = narrow32(cell)?;
                        explicit.ln = pinned(coords.ln);
                    }
                    Selector::Kernel => {
                        coords.kernel_id = cell;
                        explicit.kernel_id = pinned64(cell);
                    }
                    Selector::Grid => {
                        coords.grid_id = cell;
                        explicit.grid_id = pinned64(cell);
                    }
                    Selector::Block | Selector::Thread => unreachable!(),
                }
            }
        }
    }

    let kind = if !seen.is_empty() && !any_value && accepted.contains(AcceptedKinds::QUERY) {
        CommandKind::Query
    } else if accepted.contains(AcceptedKinds::SWITCH) {
        CommandKind::Switch
    } else if accepted.contains(AcceptedKinds::FILTER) {
        CommandKind::Filter
    } else if accepted.contains(AcceptedKinds::QUERY) && seen.is_empty() {
        CommandKind::Query
    } else {
        return Err(Error::InvalidFilter(input.to_string()));
    };

    Ok(ParsedRequest {
        kind,
        coords,
        explicit,
        physical_selector,
    })
}
