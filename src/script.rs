//! Scripting seam. The evaluator itself is an external collaborator: the
//! server hands it the script body plus KEYS/ARGV and a context that can
//! reenter the dispatcher. Scripted calls bypass AUTH, may not block, and
//! run against the calling connection's database selection.

use sha1::{Digest, Sha1};

use crate::error::{EngineError, Result};
use crate::resp::RespValue;
use crate::server::session::Session;
use crate::server::state::ServerState;

pub struct ScriptContext<'a> {
    pub state: &'a mut ServerState,
    pub session: &'a mut Session,
}

impl ScriptContext<'_> {
    /// Reenter the dispatcher the way `redis.call` would.
    pub fn call(&mut self, argv: &[Vec<u8>]) -> RespValue {
        crate::server::dispatch::dispatch_scripted(self.state, self.session, argv)
    }
}

pub trait ScriptEngine: Send + Sync {
    fn eval(
        &self,
        script: &[u8],
        keys: &[Vec<u8>],
        args: &[Vec<u8>],
        ctx: &mut ScriptContext<'_>,
    ) -> Result<RespValue>;
}

/// Default engine: the script registry (`SCRIPT LOAD`/`EXISTS`) works, but
/// evaluation requires injecting a real interpreter.
#[derive(Debug, Default)]
pub struct NullScriptEngine;

impl ScriptEngine for NullScriptEngine {
    fn eval(
        &self,
        _script: &[u8],
        _keys: &[Vec<u8>],
        _args: &[Vec<u8>],
        _ctx: &mut ScriptContext<'_>,
    ) -> Result<RespValue> {
        Err(EngineError::other(
            "script evaluation requires an injected script engine",
        ))
    }
}

pub fn script_sha1_hex(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(40);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_reference_vector() {
        // Well-known digest of "return 1".
        assert_eq!(
            script_sha1_hex(b"return 1"),
            "e0e1f9fabfc9d4800c877a703b823ac0578ff8db"
        );
        assert_eq!(
            script_sha1_hex(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }
}
