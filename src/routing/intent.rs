//! Read/write intent classification for command batches.
//!
//! Intent decides whether a batch may be served by a read replica or must
//! go to a write-capable master. It is recomputed per batch from the
//! command identifiers present, never stored.

use crate::command::Command;
use std::fmt;

/// Whether a batch requires a write-capable node or may be served by a
/// read-capable replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// May be served by a read replica.
    Read,
    /// Must go to a write-capable master.
    Write,
}

impl Intent {
    /// Classify a sequence of command identifiers.
    ///
    /// Conservative OR over the batch: one write command forces `Write`
    /// for the whole batch, because write commands must never reach a
    /// read-only replica. An empty sequence classifies `Write` for the
    /// same reason (safe default for unknown content).
    pub fn for_names<'a, I>(names: I) -> Intent
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut saw_any = false;
        for name in names {
            saw_any = true;
            if is_write_command(name) {
                return Intent::Write;
            }
        }
        if saw_any {
            Intent::Read
        } else {
            Intent::Write
        }
    }

    /// Classify a sequence of commands.
    pub fn for_commands<'a, I>(commands: I) -> Intent
    where
        I: IntoIterator<Item = &'a Command>,
    {
        Self::for_names(commands.into_iter().map(|c| c.name()))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Read => write!(f, "read"),
            Intent::Write => write!(f, "write"),
        }
    }
}

/// Whether a command identifier mutates store state.
///
/// Static classification over the store's command set. Anything not listed
/// here, including administrative and introspection commands, classifies as
/// a read. Matching is case-insensitive since identifiers arrive from
/// callers in either case.
pub fn is_write_command(name: &str) -> bool {
    // Identifiers are short; the uppercase copy stays on the stack for
    // everything the store actually ships.
    let mut upper = [0u8; 32];
    let bytes = name.as_bytes();
    if bytes.len() > upper.len() {
        return false;
    }
    for (dst, src) in upper.iter_mut().zip(bytes) {
        *dst = src.to_ascii_uppercase();
    }
    matches!(
        &upper[..bytes.len()],
        // Strings and bitmaps
        b"APPEND" | b"BITFIELD" | b"DECR" | b"DECRBY" | b"GETDEL" | b"GETEX" | b"GETSET"
            | b"INCR" | b"INCRBY" | b"INCRBYFLOAT" | b"MSET" | b"MSETNX" | b"PSETEX"
            | b"SET" | b"SETBIT" | b"SETEX" | b"SETNX" | b"SETRANGE"
            // Generic keyspace
            | b"COPY" | b"DEL" | b"EXPIRE" | b"EXPIREAT" | b"FLUSHALL" | b"FLUSHDB"
            | b"MIGRATE" | b"MOVE" | b"PERSIST" | b"PEXPIRE" | b"PEXPIREAT" | b"RENAME"
            | b"RENAMENX" | b"RESTORE" | b"SORT" | b"UNLINK"
            // Lists
            | b"BLMOVE" | b"BLMPOP" | b"BLPOP" | b"BRPOP" | b"BRPOPLPUSH" | b"LINSERT"
            | b"LMOVE" | b"LMPOP" | b"LPOP" | b"LPUSH" | b"LPUSHX" | b"LREM" | b"LSET"
            | b"LTRIM" | b"RPOP" | b"RPOPLPUSH" | b"RPUSH" | b"RPUSHX"
            // Sets
            | b"SADD" | b"SDIFFSTORE" | b"SINTERSTORE" | b"SMOVE" | b"SPOP" | b"SREM"
            | b"SUNIONSTORE"
            // Sorted sets
            | b"BZMPOP" | b"BZPOPMAX" | b"BZPOPMIN" | b"ZADD" | b"ZDIFFSTORE" | b"ZINCRBY"
            | b"ZINTERSTORE" | b"ZMPOP" | b"ZPOPMAX" | b"ZPOPMIN" | b"ZRANGESTORE"
            | b"ZREM" | b"ZREMRANGEBYLEX" | b"ZREMRANGEBYRANK" | b"ZREMRANGEBYSCORE"
            | b"ZUNIONSTORE"
            // Hashes
            | b"HDEL" | b"HINCRBY" | b"HINCRBYFLOAT" | b"HMSET" | b"HSET" | b"HSETNX"
            // HyperLogLog
            | b"PFADD" | b"PFMERGE"
            // Streams
            | b"XACK" | b"XADD" | b"XAUTOCLAIM" | b"XCLAIM" | b"XDEL" | b"XGROUP"
            | b"XSETID" | b"XTRIM"
            // Geo
            | b"GEOADD" | b"GEORADIUS" | b"GEOSEARCHSTORE"
            // Scripting mutates via the script it runs; classify conservatively.
            | b"EVAL" | b"EVALSHA" | b"FCALL"
    )
}
