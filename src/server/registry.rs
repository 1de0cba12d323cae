//! Command descriptor table: canonical name, arity grammar, flags, key
//! positions, and the dispatch id. The dispatcher validates a frame against
//! its descriptor before any handler runs; `COMMAND` introspection reads the
//! same table.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Behavior flags consulted by the dispatcher gates.
pub mod flags {
    pub const WRITE: u32 = 1 << 0;
    pub const READONLY: u32 = 1 << 1;
    pub const ADMIN: u32 = 1 << 2;
    /// Admitted on a RESP2 connection in subscribe mode.
    pub const SUBSCRIBED_OK: u32 = 1 << 3;
    /// Rejected when called from a script.
    pub const NOSCRIPT: u32 = 1 << 4;
    /// May suspend the connection.
    pub const BLOCKING: u32 = 1 << 5;
    /// Executes immediately even while a MULTI is queueing.
    pub const TX_IMMEDIATE: u32 = 1 << 6;
    pub const LOADING: u32 = 1 << 7;
    pub const STALE: u32 = 1 << 8;
    pub const PUBSUB: u32 = 1 << 9;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    // connection
    Ping, Echo, Select, SwapDb, Auth, Hello, Quit, Reset, Client, Command,
    // server admin
    DbSize, FlushDb, FlushAll, Info, Time, Config, Debug, Save, BgSave,
    LastSave, Wait, ReplicaOf, Shutdown, Object,
    // keyspace
    Del, Unlink, Exists, Touch, Type, Keys, Scan, RandomKey, Rename,
    RenameNx, Copy, Move, Expire, PExpire, ExpireAt, PExpireAt, ExpireTime,
    PExpireTime, Ttl, Pttl, Persist,
    // strings
    Get, Set, SetNx, SetEx, PSetEx, GetSet, GetDel, GetEx, Append, Strlen,
    Substr, GetRange, SetRange, Incr, Decr, IncrBy, DecrBy, IncrByFloat,
    MGet, MSet, MSetNx, Lcs,
    // bitmaps
    SetBit, GetBit, BitCount, BitPos, BitOp, BitField, BitFieldRo,
    // hyperloglog
    PfAdd, PfCount, PfMerge,
    // lists
    LPush, RPush, LPushX, RPushX, LPop, RPop, LLen, LRange, LIndex, LSet,
    LTrim, LRem, LInsert, LPos, RPopLPush, LMove, BLPop, BRPop, BRPopLPush,
    BLMove,
    // hashes
    HSet, HSetNx, HMSet, HGet, HMGet, HDel, HLen, HExists, HKeys, HVals,
    HGetAll, HStrlen, HIncrBy, HIncrByFloat, HRandField, HScan,
    // sets
    SAdd, SRem, SMembers, SIsMember, SMIsMember, SCard, SPop, SRandMember,
    SMove, SDiff, SDiffStore, SInter, SInterStore, SInterCard, SUnion,
    SUnionStore, SScan,
    // sorted sets
    ZAdd, ZRem, ZScore, ZMScore, ZCard, ZCount, ZIncrBy, ZRank, ZRevRank,
    ZRange, ZRevRange, ZRangeByScore, ZRevRangeByScore, ZRangeByLex,
    ZRevRangeByLex, ZLexCount, ZRangeStore, ZPopMin, ZPopMax, BZPopMin,
    BZPopMax, ZRandMember, ZRemRangeByRank, ZRemRangeByScore,
    ZRemRangeByLex, ZUnion, ZUnionStore, ZInter, ZInterStore, ZInterCard,
    ZDiff, ZDiffStore, ZScan,
    // streams
    XAdd, XLen, XRange, XRevRange, XRead, XDel, XTrim, XSetId, XGroup,
    XReadGroup, XAck, XPending, XClaim, XAutoClaim, XInfo,
    // geo
    GeoAdd, GeoPos, GeoDist, GeoHash, GeoSearch, GeoSearchStore,
    // pub/sub
    Subscribe, Unsubscribe, PSubscribe, PUnsubscribe, Publish, PubSubCmd,
    // transactions
    Multi, Exec, Discard, Watch, Unwatch,
    // scripting
    Eval, EvalSha, Script,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub id: CommandId,
    /// Redis arity convention: positive means exactly that many arguments
    /// including the command name, negative means at least `-arity`.
    pub arity: i32,
    pub flags: u32,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
}

const fn spec(
    name: &'static str,
    id: CommandId,
    arity: i32,
    flags: u32,
    first_key: i32,
    last_key: i32,
    key_step: i32,
) -> CommandSpec {
    CommandSpec {
        name,
        id,
        arity,
        flags,
        first_key,
        last_key,
        key_step,
    }
}

use flags::*;
use CommandId::*;

#[rustfmt::skip]
pub static COMMANDS: &[CommandSpec] = &[
    // connection
    spec("ping", Ping, -1, SUBSCRIBED_OK | STALE, 0, 0, 0),
    spec("echo", Echo, 2, 0, 0, 0, 0),
    spec("select", Select, 2, LOADING | STALE, 0, 0, 0),
    spec("swapdb", SwapDb, 3, WRITE, 0, 0, 0),
    spec("auth", Auth, -2, NOSCRIPT | LOADING | STALE, 0, 0, 0),
    spec("hello", Hello, -1, NOSCRIPT | LOADING | STALE, 0, 0, 0),
    spec("quit", Quit, -1, SUBSCRIBED_OK | NOSCRIPT, 0, 0, 0),
    spec("reset", Reset, 1, SUBSCRIBED_OK | NOSCRIPT | TX_IMMEDIATE, 0, 0, 0),
    spec("client", Client, -2, NOSCRIPT, 0, 0, 0),
    spec("command", Command, -1, LOADING | STALE, 0, 0, 0),
    // server admin
    spec("dbsize", DbSize, 1, READONLY, 0, 0, 0),
    spec("flushdb", FlushDb, -1, WRITE, 0, 0, 0),
    spec("flushall", FlushAll, -1, WRITE, 0, 0, 0),
    spec("info", Info, -1, LOADING | STALE, 0, 0, 0),
    spec("time", Time, 1, LOADING | STALE, 0, 0, 0),
    spec("config", Config, -2, ADMIN | NOSCRIPT | LOADING | STALE, 0, 0, 0),
    spec("debug", Debug, -2, ADMIN | NOSCRIPT, 0, 0, 0),
    spec("save", Save, 1, ADMIN | NOSCRIPT, 0, 0, 0),
    spec("bgsave", BgSave, -1, ADMIN | NOSCRIPT, 0, 0, 0),
    spec("lastsave", LastSave, 1, LOADING | STALE, 0, 0, 0),
    spec("wait", Wait, 3, BLOCKING, 0, 0, 0),
    spec("replicaof", ReplicaOf, 3, ADMIN | NOSCRIPT | STALE, 0, 0, 0),
    spec("slaveof", ReplicaOf, 3, ADMIN | NOSCRIPT | STALE, 0, 0, 0),
    spec("shutdown", Shutdown, -1, ADMIN | NOSCRIPT | LOADING | STALE, 0, 0, 0),
    spec("object", Object, -2, READONLY, 2, 2, 1),
    // keyspace
    spec("del", Del, -2, WRITE, 1, -1, 1),
    spec("unlink", Unlink, -2, WRITE, 1, -1, 1),
    spec("exists", Exists, -2, READONLY, 1, -1, 1),
    spec("touch", Touch, -2, READONLY, 1, -1, 1),
    spec("type", Type, 2, READONLY, 1, 1, 1),
    spec("keys", Keys, 2, READONLY, 0, 0, 0),
    spec("scan", Scan, -2, READONLY, 0, 0, 0),
    spec("randomkey", RandomKey, 1, READONLY, 0, 0, 0),
    spec("rename", Rename, 3, WRITE, 1, 2, 1),
    spec("renamenx", RenameNx, 3, WRITE, 1, 2, 1),
    spec("copy", Copy, -3, WRITE, 1, 2, 1),
    spec("move", Move, 3, WRITE, 1, 1, 1),
    spec("expire", Expire, -3, WRITE, 1, 1, 1),
    spec("pexpire", PExpire, -3, WRITE, 1, 1, 1),
    spec("expireat", ExpireAt, -3, WRITE, 1, 1, 1),
    spec("pexpireat", PExpireAt, -3, WRITE, 1, 1, 1),
    spec("expiretime", ExpireTime, 2, READONLY, 1, 1, 1),
    spec("pexpiretime", PExpireTime, 2, READONLY, 1, 1, 1),
    spec("ttl", Ttl, 2, READONLY, 1, 1, 1),
    spec("pttl", Pttl, 2, READONLY, 1, 1, 1),
    spec("persist", Persist, 2, WRITE, 1, 1, 1),
    // strings
    spec("get", Get, 2, READONLY, 1, 1, 1),
    spec("set", Set, -3, WRITE, 1, 1, 1),
    spec("setnx", SetNx, 3, WRITE, 1, 1, 1),
    spec("setex", SetEx, 4, WRITE, 1, 1, 1),
    spec("psetex", PSetEx, 4, WRITE, 1, 1, 1),
    spec("getset", GetSet, 3, WRITE, 1, 1, 1),
    spec("getdel", GetDel, 2, WRITE, 1, 1, 1),
    spec("getex", GetEx, -2, WRITE, 1, 1, 1),
    spec("append", Append, 3, WRITE, 1, 1, 1),
    spec("strlen", Strlen, 2, READONLY, 1, 1, 1),
    spec("substr", Substr, 4, READONLY, 1, 1, 1),
    spec("getrange", GetRange, 4, READONLY, 1, 1, 1),
    spec("setrange", SetRange, 4, WRITE, 1, 1, 1),
    spec("incr", Incr, 2, WRITE, 1, 1, 1),
    spec("decr", Decr, 2, WRITE, 1, 1, 1),
    spec("incrby", IncrBy, 3, WRITE, 1, 1, 1),
    spec("decrby", DecrBy, 3, WRITE, 1, 1, 1),
    spec("incrbyfloat", IncrByFloat, 3, WRITE, 1, 1, 1),
    spec("mget", MGet, -2, READONLY, 1, -1, 1),
    spec("mset", MSet, -3, WRITE, 1, -1, 2),
    spec("msetnx", MSetNx, -3, WRITE, 1, -1, 2),
    spec("lcs", Lcs, -3, READONLY, 1, 2, 1),
    // bitmaps
    spec("setbit", SetBit, 4, WRITE, 1, 1, 1),
    spec("getbit", GetBit, 3, READONLY, 1, 1, 1),
    spec("bitcount", BitCount, -2, READONLY, 1, 1, 1),
    spec("bitpos", BitPos, -3, READONLY, 1, 1, 1),
    spec("bitop", BitOp, -4, WRITE, 2, -1, 1),
    spec("bitfield", BitField, -2, WRITE, 1, 1, 1),
    spec("bitfield_ro", BitFieldRo, -2, READONLY, 1, 1, 1),
    // hyperloglog
    spec("pfadd", PfAdd, -2, WRITE, 1, 1, 1),
    spec("pfcount", PfCount, -2, READONLY, 1, -1, 1),
    spec("pfmerge", PfMerge, -2, WRITE, 1, -1, 1),
    // lists
    spec("lpush", LPush, -3, WRITE, 1, 1, 1),
    spec("rpush", RPush, -3, WRITE, 1, 1, 1),
    spec("lpushx", LPushX, -3, WRITE, 1, 1, 1),
    spec("rpushx", RPushX, -3, WRITE, 1, 1, 1),
    spec("lpop", LPop, -2, WRITE, 1, 1, 1),
    spec("rpop", RPop, -2, WRITE, 1, 1, 1),
    spec("llen", LLen, 2, READONLY, 1, 1, 1),
    spec("lrange", LRange, 4, READONLY, 1, 1, 1),
    spec("lindex", LIndex, 3, READONLY, 1, 1, 1),
    spec("lset", LSet, 4, WRITE, 1, 1, 1),
    spec("ltrim", LTrim, 4, WRITE, 1, 1, 1),
    spec("lrem", LRem, 4, WRITE, 1, 1, 1),
    spec("linsert", LInsert, 5, WRITE, 1, 1, 1),
    spec("lpos", LPos, -3, READONLY, 1, 1, 1),
    spec("rpoplpush", RPopLPush, 3, WRITE, 1, 2, 1),
    spec("lmove", LMove, 5, WRITE, 1, 2, 1),
    spec("blpop", BLPop, -3, WRITE | BLOCKING | NOSCRIPT, 1, -2, 1),
    spec("brpop", BRPop, -3, WRITE | BLOCKING | NOSCRIPT, 1, -2, 1),
    spec("brpoplpush", BRPopLPush, 4, WRITE | BLOCKING | NOSCRIPT, 1, 2, 1),
    spec("blmove", BLMove, 6, WRITE | BLOCKING | NOSCRIPT, 1, 2, 1),
    // hashes
    spec("hset", HSet, -4, WRITE, 1, 1, 1),
    spec("hsetnx", HSetNx, 4, WRITE, 1, 1, 1),
    spec("hmset", HMSet, -4, WRITE, 1, 1, 1),
    spec("hget", HGet, 3, READONLY, 1, 1, 1),
    spec("hmget", HMGet, -3, READONLY, 1, 1, 1),
    spec("hdel", HDel, -3, WRITE, 1, 1, 1),
    spec("hlen", HLen, 2, READONLY, 1, 1, 1),
    spec("hexists", HExists, 3, READONLY, 1, 1, 1),
    spec("hkeys", HKeys, 2, READONLY, 1, 1, 1),
    spec("hvals", HVals, 2, READONLY, 1, 1, 1),
    spec("hgetall", HGetAll, 2, READONLY, 1, 1, 1),
    spec("hstrlen", HStrlen, 3, READONLY, 1, 1, 1),
    spec("hincrby", HIncrBy, 4, WRITE, 1, 1, 1),
    spec("hincrbyfloat", HIncrByFloat, 4, WRITE, 1, 1, 1),
    spec("hrandfield", HRandField, -2, READONLY, 1, 1, 1),
    spec("hscan", HScan, -3, READONLY, 1, 1, 1),
    // sets
    spec("sadd", SAdd, -3, WRITE, 1, 1, 1),
    spec("srem", SRem, -3, WRITE, 1, 1, 1),
    spec("smembers", SMembers, 2, READONLY, 1, 1, 1),
    spec("sismember", SIsMember, 3, READONLY, 1, 1, 1),
    spec("smismember", SMIsMember, -3, READONLY, 1, 1, 1),
    spec("scard", SCard, 2, READONLY, 1, 1, 1),
    spec("spop", SPop, -2, WRITE, 1, 1, 1),
    spec("srandmember", SRandMember, -2, READONLY, 1, 1, 1),
    spec("smove", SMove, 4, WRITE, 1, 2, 1),
    spec("sdiff", SDiff, -2, READONLY, 1, -1, 1),
    spec("sdiffstore", SDiffStore, -3, WRITE, 1, -1, 1),
    spec("sinter", SInter, -2, READONLY, 1, -1, 1),
    spec("sinterstore", SInterStore, -3, WRITE, 1, -1, 1),
    spec("sintercard", SInterCard, -3, READONLY, 0, 0, 0),
    spec("sunion", SUnion, -2, READONLY, 1, -1, 1),
    spec("sunionstore", SUnionStore, -3, WRITE, 1, -1, 1),
    spec("sscan", SScan, -3, READONLY, 1, 1, 1),
    // sorted sets
    spec("zadd", ZAdd, -4, WRITE, 1, 1, 1),
    spec("zrem", ZRem, -3, WRITE, 1, 1, 1),
    spec("zscore", ZScore, 3, READONLY, 1, 1, 1),
    spec("zmscore", ZMScore, -3, READONLY, 1, 1, 1),
    spec("zcard", ZCard, 2, READONLY, 1, 1, 1),
    spec("zcount", ZCount, 4, READONLY, 1, 1, 1),
    spec("zincrby", ZIncrBy, 4, WRITE, 1, 1, 1),
    spec("zrank", ZRank, -3, READONLY, 1, 1, 1),
    spec("zrevrank", ZRevRank, -3, READONLY, 1, 1, 1),
    spec("zrange", ZRange, -4, READONLY, 1, 1, 1),
    spec("zrevrange", ZRevRange, -4, READONLY, 1, 1, 1),
    spec("zrangebyscore", ZRangeByScore, -4, READONLY, 1, 1, 1),
    spec("zrevrangebyscore", ZRevRangeByScore, -4, READONLY, 1, 1, 1),
    spec("zrangebylex", ZRangeByLex, -4, READONLY, 1, 1, 1),
    spec("zrevrangebylex", ZRevRangeByLex, -4, READONLY, 1, 1, 1),
    spec("zlexcount", ZLexCount, 4, READONLY, 1, 1, 1),
    spec("zrangestore", ZRangeStore, -5, WRITE, 1, 2, 1),
    spec("zpopmin", ZPopMin, -2, WRITE, 1, 1, 1),
    spec("zpopmax", ZPopMax, -2, WRITE, 1, 1, 1),
    spec("bzpopmin", BZPopMin, -3, WRITE | BLOCKING | NOSCRIPT, 1, -2, 1),
    spec("bzpopmax", BZPopMax, -3, WRITE | BLOCKING | NOSCRIPT, 1, -2, 1),
    spec("zrandmember", ZRandMember, -2, READONLY, 1, 1, 1),
    spec("zremrangebyrank", ZRemRangeByRank, 4, WRITE, 1, 1, 1),
    spec("zremrangebyscore", ZRemRangeByScore, 4, WRITE, 1, 1, 1),
    spec("zremrangebylex", ZRemRangeByLex, 4, WRITE, 1, 1, 1),
    spec("zunion", ZUnion, -3, READONLY, 0, 0, 0),
    spec("zunionstore", ZUnionStore, -4, WRITE, 1, 1, 1),
    spec("zinter", ZInter, -3, READONLY, 0, 0, 0),
    spec("zinterstore", ZInterStore, -4, WRITE, 1, 1, 1),
    spec("zintercard", ZInterCard, -3, READONLY, 0, 0, 0),
    spec("zdiff", ZDiff, -3, READONLY, 0, 0, 0),
    spec("zdiffstore", ZDiffStore, -4, WRITE, 1, 1, 1),
    spec("zscan", ZScan, -3, READONLY, 1, 1, 1),
    // streams
    spec("xadd", XAdd, -5, WRITE, 1, 1, 1),
    spec("xlen", XLen, 2, READONLY, 1, 1, 1),
    spec("xrange", XRange, -4, READONLY, 1, 1, 1),
    spec("xrevrange", XRevRange, -4, READONLY, 1, 1, 1),
    spec("xread", XRead, -4, READONLY | BLOCKING | NOSCRIPT, 0, 0, 0),
    spec("xdel", XDel, -3, WRITE, 1, 1, 1),
    spec("xtrim", XTrim, -4, WRITE, 1, 1, 1),
    spec("xsetid", XSetId, -3, WRITE, 1, 1, 1),
    spec("xgroup", XGroup, -2, WRITE, 2, 2, 1),
    spec("xreadgroup", XReadGroup, -7, WRITE | BLOCKING | NOSCRIPT, 0, 0, 0),
    spec("xack", XAck, -4, WRITE, 1, 1, 1),
    spec("xpending", XPending, -3, READONLY, 1, 1, 1),
    spec("xclaim", XClaim, -6, WRITE, 1, 1, 1),
    spec("xautoclaim", XAutoClaim, -7, WRITE, 1, 1, 1),
    spec("xinfo", XInfo, -2, READONLY, 2, 2, 1),
    // geo
    spec("geoadd", GeoAdd, -5, WRITE, 1, 1, 1),
    spec("geopos", GeoPos, -2, READONLY, 1, 1, 1),
    spec("geodist", GeoDist, -4, READONLY, 1, 1, 1),
    spec("geohash", GeoHash, -2, READONLY, 1, 1, 1),
    spec("geosearch", GeoSearch, -7, READONLY, 1, 1, 1),
    spec("geosearchstore", GeoSearchStore, -8, WRITE, 1, 2, 1),
    // pub/sub
    spec("subscribe", Subscribe, -2, PUBSUB | SUBSCRIBED_OK | NOSCRIPT, 0, 0, 0),
    spec("unsubscribe", Unsubscribe, -1, PUBSUB | SUBSCRIBED_OK | NOSCRIPT, 0, 0, 0),
    spec("psubscribe", PSubscribe, -2, PUBSUB | SUBSCRIBED_OK | NOSCRIPT, 0, 0, 0),
    spec("punsubscribe", PUnsubscribe, -1, PUBSUB | SUBSCRIBED_OK | NOSCRIPT, 0, 0, 0),
    spec("publish", Publish, 3, PUBSUB | LOADING | STALE, 0, 0, 0),
    spec("pubsub", PubSubCmd, -2, PUBSUB | LOADING | STALE, 0, 0, 0),
    // transactions
    spec("multi", Multi, 1, NOSCRIPT | TX_IMMEDIATE, 0, 0, 0),
    spec("exec", Exec, 1, NOSCRIPT | TX_IMMEDIATE, 0, 0, 0),
    spec("discard", Discard, 1, NOSCRIPT | TX_IMMEDIATE, 0, 0, 0),
    spec("watch", Watch, -2, NOSCRIPT | TX_IMMEDIATE, 1, -1, 1),
    spec("unwatch", Unwatch, 1, NOSCRIPT | TX_IMMEDIATE, 0, 0, 0),
    // scripting
    spec("eval", Eval, -3, NOSCRIPT, 0, 0, 0),
    spec("evalsha", EvalSha, -3, NOSCRIPT, 0, 0, 0),
    spec("script", Script, -2, NOSCRIPT, 0, 0, 0),
];

fn table() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static TABLE: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    TABLE.get_or_init(|| COMMANDS.iter().map(|spec| (spec.name, spec)).collect())
}

/// Case-insensitive command resolution.
pub fn resolve(name: &[u8]) -> Option<&'static CommandSpec> {
    let lowered = String::from_utf8(name.to_ascii_lowercase()).ok()?;
    table().get(lowered.as_str()).copied()
}

pub fn command_count() -> usize {
    table().len()
}

impl CommandSpec {
    /// `argc` counts the command name itself, as the reference does.
    pub fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i32;
        if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Positional key extraction (COMMAND GETKEYS). Commands with dynamic
    /// key positions (EVAL, XREAD, ZUNION...) report none here.
    pub fn extract_keys<'a>(&self, argv: &'a [Vec<u8>]) -> Vec<&'a [u8]> {
        if self.first_key <= 0 {
            return Vec::new();
        }
        let last = if self.last_key < 0 {
            (argv.len() as i32 + self.last_key) as usize
        } else {
            self.last_key as usize
        };
        let mut keys = Vec::new();
        let mut i = self.first_key as usize;
        while i <= last && i < argv.len() {
            keys.push(argv[i].as_slice());
            i += self.key_step.max(1) as usize;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_case_insensitive() {
        assert_eq!(resolve(b"GET").unwrap().id, CommandId::Get);
        assert_eq!(resolve(b"get").unwrap().id, CommandId::Get);
        assert_eq!(resolve(b"GeT").unwrap().id, CommandId::Get);
        assert!(resolve(b"nosuch").is_none());
    }

    #[test]
    fn arity_grammar() {
        let get = resolve(b"get").unwrap();
        assert!(get.arity_ok(2));
        assert!(!get.arity_ok(1));
        assert!(!get.arity_ok(3));

        let set = resolve(b"set").unwrap();
        assert!(set.arity_ok(3));
        assert!(set.arity_ok(5));
        assert!(!set.arity_ok(2));
    }

    #[test]
    fn key_extraction() {
        let mset = resolve(b"mset").unwrap();
        let argv: Vec<Vec<u8>> = ["mset", "a", "1", "b", "2"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(mset.extract_keys(&argv), vec![b"a".as_slice(), b"b"]);

        let blpop = resolve(b"blpop").unwrap();
        let argv: Vec<Vec<u8>> = ["blpop", "q1", "q2", "0"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(blpop.extract_keys(&argv), vec![b"q1".as_slice(), b"q2"]);

        let publish = resolve(b"publish").unwrap();
        let argv: Vec<Vec<u8>> = ["publish", "ch", "msg"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert!(publish.extract_keys(&argv).is_empty());
    }

    #[test]
    fn aliases_share_an_id() {
        assert_eq!(resolve(b"slaveof").unwrap().id, CommandId::ReplicaOf);
        assert_eq!(resolve(b"unlink").unwrap().id, CommandId::Unlink);
    }

    #[test]
    fn no_duplicate_names() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMANDS {
            assert!(seen.insert(spec.name), "duplicate {}", spec.name);
        }
    }
}
