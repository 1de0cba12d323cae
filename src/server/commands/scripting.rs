//! EVAL/EVALSHA/SCRIPT over the injected script engine. The SHA1 registry
//! is first-class; evaluation is delegated through the seam described in
//! the scripting module.

use crate::error::EngineError;
use crate::num::parse_i64;
use crate::resp::RespValue;
use crate::script::{script_sha1_hex, ScriptContext};
use crate::server::session::Session;
use crate::server::state::ServerState;

use super::keyword;

fn split_keys_args(args: &[Vec<u8>]) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>), RespValue> {
    let numkeys = match parse_i64(&args[1]) {
        Ok(n) if n >= 0 => n as usize,
        Ok(_) => {
            return Err(RespValue::error("ERR Number of keys can't be negative"));
        }
        Err(e) => return Err(e.into()),
    };
    let rest = &args[2..];
    if numkeys > rest.len() {
        return Err(RespValue::error(
            "ERR Number of keys can't be greater than number of args",
        ));
    }
    Ok((rest[..numkeys].to_vec(), rest[numkeys..].to_vec()))
}

fn run_script(
    st: &mut ServerState,
    s: &mut Session,
    body: Vec<u8>,
    keys: Vec<Vec<u8>>,
    argv: Vec<Vec<u8>>,
) -> RespValue {
    let engine = st.engine.clone();
    let was_blocking = s.no_blocking;
    let was_script = s.from_script;
    s.no_blocking = true;
    s.from_script = true;
    let result = {
        let mut ctx = ScriptContext {
            state: st,
            session: s,
        };
        engine.eval(&body, &keys, &argv, &mut ctx)
    };
    s.no_blocking = was_blocking;
    s.from_script = was_script;
    match result {
        Ok(v) => v,
        Err(e) => e.into(),
    }
}

pub fn eval(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (keys, argv) = match split_keys_args(args) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let body = args[0].clone();
    // EVAL caches the script like SCRIPT LOAD does.
    st.scripts.insert(script_sha1_hex(&body), body.clone());
    run_script(st, s, body, keys, argv)
}

pub fn evalsha(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let (keys, argv) = match split_keys_args(args) {
        Ok(v) => v,
        Err(reply) => return reply,
    };
    let sha = String::from_utf8_lossy(&args[0]).to_ascii_lowercase();
    let Some(body) = st.scripts.get(&sha).cloned() else {
        return EngineError::NoScript.into();
    };
    run_script(st, s, body, keys, argv)
}

pub fn script(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"LOAD" => {
            let Some(body) = args.get(1) else {
                return EngineError::Syntax.into();
            };
            let sha = script_sha1_hex(body);
            st.scripts.insert(sha.clone(), body.clone());
            RespValue::bulk(sha.into_bytes())
        }
        b"EXISTS" => RespValue::Array(Some(
            args[1..]
                .iter()
                .map(|raw| {
                    let sha = String::from_utf8_lossy(raw).to_ascii_lowercase();
                    RespValue::Integer(i64::from(st.scripts.contains_key(&sha)))
                })
                .collect(),
        )),
        b"FLUSH" => {
            match args.get(1) {
                None => {}
                Some(mode) if keyword(mode, "ASYNC") || keyword(mode, "SYNC") => {}
                Some(_) => {
                    return RespValue::error(
                        "ERR SCRIPT FLUSH only support SYNC|ASYNC option",
                    );
                }
            }
            st.scripts.clear();
            RespValue::ok()
        }
        _ => RespValue::error(format!(
            "ERR Unknown SCRIPT subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}
