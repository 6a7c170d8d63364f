//! In-process store speaking the subset of the Redis protocol the remote tier
//! uses: GET, SET, DEL, KEYS, MULTI/EXEC, AUTH, FLUSHALL and PING.
//!
//! Commands arrive through [`ConnectionLike`] packed exactly as they would be
//! written to a socket, so the remote tier runs unchanged against it. Hand it
//! to a remote tier with [`RemotePool::memory`](crate::RemotePool::memory).

use parking_lot::Mutex;
use redis::aio::ConnectionLike;
use redis::{Cmd, ErrorKind, Parser, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Vec<u8>>,
    password: Option<String>,
}

/// Shared handle to an in-process key-value store.
///
/// Clones refer to the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that only accepts `AUTH` with `password`.
    pub fn with_password(password: impl Into<String>) -> Self {
        let store = Self::default();
        store.state.lock().password = Some(password.into());
        store
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.state.lock().entries.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
        }
    }

    /// Run `count` packed requests under one lock, returning one reply per
    /// request. MULTI ... EXEC blocks are applied atomically.
    fn execute_packed(&self, packed: &[u8], count: usize) -> RedisResult<Vec<Value>> {
        let requests = decode_requests(packed, count)?;
        let mut state = self.state.lock();
        let mut replies = Vec::with_capacity(requests.len());
        let mut queued: Option<Vec<Vec<Vec<u8>>>> = None;

        for args in requests {
            let name = args
                .first()
                .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
                .unwrap_or_default();
            match name.as_str() {
                "MULTI" => {
                    if queued.is_some() {
                        return Err(RedisError::from((
                            ErrorKind::ResponseError,
                            "MULTI calls can not be nested",
                        )));
                    }
                    queued = Some(Vec::new());
                    replies.push(Value::Okay);
                }
                "EXEC" => {
                    let Some(commands) = queued.take() else {
                        return Err(RedisError::from((
                            ErrorKind::ResponseError,
                            "EXEC without MULTI",
                        )));
                    };
                    let results = commands
                        .iter()
                        .map(|cmd| execute(&mut state, cmd))
                        .collect::<RedisResult<Vec<_>>>()?;
                    replies.push(Value::Array(results));
                }
                _ => match queued.as_mut() {
                    Some(pending) => {
                        pending.push(args);
                        replies.push(Value::SimpleString("QUEUED".to_string()));
                    }
                    None => replies.push(execute(&mut state, &args)?),
                },
            }
        }

        Ok(replies)
    }
}

fn execute(state: &mut MemoryState, args: &[Vec<u8>]) -> RedisResult<Value> {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let params = &args[1..];
    match (name.as_str(), params) {
        ("PING", []) => Ok(Value::SimpleString("PONG".to_string())),
        ("GET", [key]) => Ok(state
            .entries
            .get(&utf8(key)?)
            .map(|v| Value::BulkString(v.clone()))
            .unwrap_or(Value::Nil)),
        ("SET", [key, value]) => {
            state.entries.insert(utf8(key)?, value.clone());
            Ok(Value::Okay)
        }
        ("DEL", keys) if !keys.is_empty() => {
            let mut removed = 0;
            for key in keys {
                if state.entries.remove(&utf8(key)?).is_some() {
                    removed += 1;
                }
            }
            Ok(Value::Int(removed))
        }
        ("KEYS", [pattern]) => Ok(Value::Array(
            state
                .entries
                .keys()
                .filter(|key| glob_match(pattern, key.as_bytes()))
                .map(|key| Value::BulkString(key.clone().into_bytes()))
                .collect(),
        )),
        ("FLUSHALL", []) => {
            state.entries.clear();
            Ok(Value::Okay)
        }
        ("AUTH", [password]) | ("AUTH", [_, password]) => match &state.password {
            None => Err(RedisError::from((
                ErrorKind::ResponseError,
                "AUTH called without any password configured",
            ))),
            Some(expected) if expected.as_bytes() == password.as_slice() => Ok(Value::Okay),
            Some(_) => Err(RedisError::from((
                ErrorKind::AuthenticationFailed,
                "WRONGPASS invalid username-password pair",
            ))),
        },
        _ => Err(RedisError::from((
            ErrorKind::ResponseError,
            "unknown command or wrong number of arguments",
            name,
        ))),
    }
}

fn utf8(bytes: &[u8]) -> RedisResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RedisError::from((ErrorKind::TypeError, "key is not valid UTF-8")))
}

fn protocol_error() -> RedisError {
    RedisError::from((ErrorKind::ResponseError, "malformed request"))
}

/// Decode `count` request arrays of bulk strings from a packed buffer.
fn decode_requests(mut packed: &[u8], count: usize) -> RedisResult<Vec<Vec<Vec<u8>>>> {
    let mut parser = Parser::new();
    (0..count)
        .map(|_| -> RedisResult<Vec<Vec<u8>>> {
            match parser.parse_value(&mut packed)? {
                Value::Array(args) if !args.is_empty() => args
                    .into_iter()
                    .map(|arg| match arg {
                        Value::BulkString(bytes) => Ok(bytes),
                        _ => Err(protocol_error()),
                    })
                    .collect(),
                _ => Err(protocol_error()),
            }
        })
        .collect()
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and `\` escapes.
///
/// Runs in O(pattern × text): on a mismatch only the most recent `*` is
/// retried.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index after the last `*`, and the text index it is anchored at
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if pattern.get(p) == Some(&b'*') {
            while pattern.get(p) == Some(&b'*') {
                p += 1;
            }
            if p == pattern.len() {
                return true;
            }
            star = Some((p, t));
            continue;
        }
        if let Some(next) = match_token(pattern, p, text[t]) {
            p = next;
            t += 1;
            continue;
        }
        match star {
            Some((after_star, anchor)) => {
                p = after_star;
                t = anchor + 1;
                star = Some((after_star, anchor + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&b| b == b'*')
}

/// Match one pattern token at `p` against `c`, returning the index of the
/// next token.
fn match_token(pattern: &[u8], p: usize, c: u8) -> Option<usize> {
    match *pattern.get(p)? {
        b'?' => Some(p + 1),
        b'[' => match match_class(&pattern[p + 1..], c) {
            Some((true, after)) => Some(pattern.len() - after.len()),
            Some((false, _)) => None,
            // Unterminated class matches a literal '['
            None => (c == b'[').then_some(p + 1),
        },
        b'\\' if p + 1 < pattern.len() => (pattern[p + 1] == c).then_some(p + 2),
        literal => (literal == c).then_some(p + 1),
    }
}

/// Match `c` against a `[...]` class body. Returns whether it matched and the
/// pattern after the closing bracket.
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut body) = match class.split_first() {
        Some((b'^', rest)) => (true, rest),
        _ => (false, class),
    };
    let mut matched = false;
    loop {
        match body {
            [] => return None,
            [b']', rest @ ..] => return Some((matched != negate, rest)),
            [b'\\', escaped, rest @ ..] => {
                matched |= *escaped == c;
                body = rest;
            }
            [lo, b'-', hi, rest @ ..] if *hi != b']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                matched |= (lo..=hi).contains(&c);
                body = rest;
            }
            [single, rest @ ..] => {
                matched |= *single == c;
                body = rest;
            }
        }
    }
}

/// Connection to a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    store: MemoryStore,
}

impl ConnectionLike for MemoryConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        let reply = self
            .store
            .execute_packed(&cmd.get_packed_command(), 1)
            .map(|mut replies| replies.pop().unwrap_or(Value::Nil));
        Box::pin(std::future::ready(reply))
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        let replies = self
            .store
            .execute_packed(&cmd.get_packed_pipeline(), offset + count)
            .map(|replies| replies.into_iter().skip(offset).take(count).collect());
        Box::pin(std::future::ready(replies))
    }

    fn get_db(&self) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"foo*", b"foo1"));
        assert!(glob_match(b"foo*", b"foo"));
        assert!(!glob_match(b"foo*", b"bar"));
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"user:\\*", b"user:*"));
        assert!(!glob_match(b"user:\\*", b"user:1"));
        assert!(glob_match(b"exact", b"exact"));
        assert!(!glob_match(b"exact", b"exactly"));
    }

    #[tokio::test]
    async fn test_commands_round_trip() {
        let store = MemoryStore::new();
        let mut conn = store.connection();

        let _: () = redis::cmd("SET")
            .arg("k")
            .arg(b"v".as_slice())
            .query_async(&mut conn)
            .await
            .unwrap();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg("k").query_async(&mut conn).await.unwrap();
        assert_eq!(value, Some(b"v".to_vec()));

        let missing: Option<Vec<u8>> =
            redis::cmd("GET").arg("nope").query_async(&mut conn).await.unwrap();
        assert_eq!(missing, None);

        let pong: String = redis::cmd("PING").query_async(&mut conn).await.unwrap();
        assert_eq!(pong, "PONG");
    }

    #[tokio::test]
    async fn test_atomic_pipeline() {
        let store = MemoryStore::new();
        store.insert("a", "1");
        store.insert("b", "2");
        store.insert("c", "3");
        let mut conn = store.connection();

        let mut pipe = redis::pipe();
        pipe.atomic().del("a").ignore().del("b").ignore();
        let _: () = pipe.query_async(&mut conn).await.unwrap();

        assert_eq!(store.keys(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_auth() {
        let store = MemoryStore::with_password("secret");
        let mut conn = store.connection();

        let ok: RedisResult<()> = redis::cmd("AUTH").arg("secret").query_async(&mut conn).await;
        assert!(ok.is_ok());

        let err: RedisResult<()> = redis::cmd("AUTH").arg("wrong").query_async(&mut conn).await;
        assert_eq!(err.unwrap_err().kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(decode_requests(b"GET k\r\n", 1).is_err());
        assert!(decode_requests(b"*1\r\n$10\r\nshort\r\n", 1).is_err());
        assert!(decode_requests(b"+OK\r\n", 1).is_err());
    }

    #[test]
    fn test_decode_several_requests() {
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg("a").cmd("DEL").arg("b");
        let requests = decode_requests(&pipe.get_packed_pipeline(), 4).unwrap();
        let names: Vec<&[u8]> = requests.iter().map(|r| r[0].as_slice()).collect();
        assert_eq!(
            names,
            vec![
                b"MULTI".as_slice(),
                b"DEL".as_slice(),
                b"DEL".as_slice(),
                b"EXEC".as_slice()
            ]
        );
        assert_eq!(requests[2], vec![b"DEL".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_glob_match_many_stars() {
        let text = vec![b'a'; 4096];
        assert!(!glob_match(b"*a*a*a*a*a*a*a*a*a*a*b", &text));
        assert!(glob_match(b"*a*a*a*a*a*a*a*a*a*a*", &text));
        assert!(glob_match(b"a**a", b"aa"));
        assert!(!glob_match(b"a*b*c", b"abbbb"));
        assert!(glob_match(b"a*b*c", b"abxbxc"));
    }
}
