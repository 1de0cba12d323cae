//! HyperLogLog commands over the dense string representation.

use crate::error::EngineError;
use crate::resp::RespValue;
use crate::server::pubsub::classes;
use crate::server::session::Session;
use crate::server::state::ServerState;
use crate::store::hll;

pub fn pfadd(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let key = &args[0];
    let created = match st.str_value(s.db, key) {
        Ok(Some(v)) => {
            if !hll::is_hll(v) {
                return EngineError::InvalidHll.into();
            }
            false
        }
        Ok(None) => {
            st.write_string(s.db, key, hll::create(), false);
            true
        }
        Err(e) => return e.into(),
    };

    let mut updated = created;
    {
        let value = match st.str_value_mut(s.db, key) {
            Ok(Some(v)) => v,
            _ => return EngineError::WrongType.into(),
        };
        for element in &args[1..] {
            match hll::add(value, element) {
                Ok(true) => updated = true,
                Ok(false) => {}
                Err(e) => return e.into(),
            }
        }
    }
    if updated {
        st.mark_write(s.db, key);
        st.notify_event(s.db, classes::STRING, "pfadd", key);
    }
    RespValue::Integer(i64::from(updated))
}

pub fn pfcount(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    if args.len() == 1 {
        return match st.str_value(s.db, &args[0]) {
            Ok(Some(v)) => match hll::count(v) {
                Ok(n) => RespValue::Integer(n as i64),
                Err(e) => e.into(),
            },
            Ok(None) => RespValue::Integer(0),
            Err(e) => e.into(),
        };
    }
    let mut merged = hll::create();
    for key in args {
        match st.str_value(s.db, key) {
            Ok(Some(v)) => {
                let source = v.clone();
                if let Err(e) = hll::merge(&mut merged, &source) {
                    return e.into();
                }
            }
            Ok(None) => {}
            Err(e) => return e.into(),
        }
    }
    match hll::count(&merged) {
        Ok(n) => RespValue::Integer(n as i64),
        Err(e) => e.into(),
    }
}

pub fn pfmerge(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let dest = &args[0];
    let mut merged = match st.str_value(s.db, dest) {
        Ok(Some(v)) => {
            if !hll::is_hll(v) {
                return EngineError::InvalidHll.into();
            }
            v.clone()
        }
        Ok(None) => hll::create(),
        Err(e) => return e.into(),
    };
    for key in &args[1..] {
        match st.str_value(s.db, key) {
            Ok(Some(v)) => {
                let source = v.clone();
                if let Err(e) = hll::merge(&mut merged, &source) {
                    return e.into();
                }
            }
            Ok(None) => {}
            Err(e) => return e.into(),
        }
    }
    st.write_string(s.db, dest, merged, true);
    st.mark_write(s.db, dest);
    st.notify_event(s.db, classes::STRING, "pfadd", dest);
    RespValue::ok()
}
