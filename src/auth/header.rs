use pom::utf8::{end, none_of, one_of, seq, Parser};

pub enum AuthHeader<'a> {
    Bearer { token: &'a str },
}

impl<'a> AuthHeader<'a> {
    pub fn token(&self) -> &'a str {
        match self {
            AuthHeader::Bearer { token } => *token,
        }
    }
}

pub fn whitespace<'a>() -> Parser<'a, &'a str> {
    one_of(" \t").repeat(1..).collect()
}

fn scheme<'a>() -> Parser<'a, &'a str> {
    (seq("Bearer") | seq("bearer")).name("bearer scheme")
}

fn bearer<'a>() -> Parser<'a, AuthHeader<'a>> {
    let rest = none_of(" \t").repeat(1..).collect();

    ((scheme() + whitespace()) * rest - whitespace().opt() - end())
        .map(|token| AuthHeader::Bearer { token })
        .name("bearer auth")
}

pub fn auth_header<'a>() -> Parser<'a, AuthHeader<'a>> {
    bearer().name("auth header")
}

/// Compares two secrets without short-circuiting on the first mismatch.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());

    let diff = given
        .iter()
        .zip(expected)
        .fold(given.len() ^ expected.len(), |acc, (a, b)| {
            acc | usize::from(a ^ b)
        });

    diff == 0
}
