//! SUBSCRIBE-family handlers. Confirmation frames are push frames; the
//! encoder downgrades them to plain arrays for RESP2 connections.

use crate::resp::RespValue;
use crate::server::session::Session;
use crate::server::state::ServerState;

use super::bulk_array;

fn confirm(kind: &str, target: Option<&[u8]>, count: usize) -> RespValue {
    RespValue::Push(vec![
        RespValue::bulk(kind.as_bytes().to_vec()),
        match target {
            Some(t) => RespValue::bulk(t.to_vec()),
            None => RespValue::null(),
        },
        RespValue::Integer(count as i64),
    ])
}

pub fn subscribe(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut frames = Vec::with_capacity(args.len());
    for channel in args {
        s.channels.insert(channel.clone());
        st.pubsub
            .subscribe(channel.clone(), s.id, s.push_tx.clone());
        frames.push(confirm("subscribe", Some(channel), s.subscription_count()));
    }
    RespValue::Seq(frames)
}

pub fn unsubscribe(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let targets: Vec<Vec<u8>> = if args.is_empty() {
        let mut all: Vec<Vec<u8>> = s.channels.iter().cloned().collect();
        all.sort();
        all
    } else {
        args.to_vec()
    };
    if targets.is_empty() {
        return confirm("unsubscribe", None, s.subscription_count());
    }
    let mut frames = Vec::with_capacity(targets.len());
    for channel in targets {
        s.channels.remove(&channel);
        st.pubsub.unsubscribe(&channel, s.id);
        frames.push(confirm(
            "unsubscribe",
            Some(&channel),
            s.subscription_count(),
        ));
    }
    RespValue::Seq(frames)
}

pub fn psubscribe(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let mut frames = Vec::with_capacity(args.len());
    for pattern in args {
        s.patterns.insert(pattern.clone());
        st.pubsub
            .psubscribe(pattern.clone(), s.id, s.push_tx.clone());
        frames.push(confirm("psubscribe", Some(pattern), s.subscription_count()));
    }
    RespValue::Seq(frames)
}

pub fn punsubscribe(st: &mut ServerState, s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let targets: Vec<Vec<u8>> = if args.is_empty() {
        let mut all: Vec<Vec<u8>> = s.patterns.iter().cloned().collect();
        all.sort();
        all
    } else {
        args.to_vec()
    };
    if targets.is_empty() {
        return confirm("punsubscribe", None, s.subscription_count());
    }
    let mut frames = Vec::with_capacity(targets.len());
    for pattern in targets {
        s.patterns.remove(&pattern);
        st.pubsub.punsubscribe(&pattern, s.id);
        frames.push(confirm(
            "punsubscribe",
            Some(&pattern),
            s.subscription_count(),
        ));
    }
    RespValue::Seq(frames)
}

pub fn publish(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    RespValue::Integer(st.pubsub.publish(&args[0], &args[1]))
}

pub fn pubsub_introspect(st: &mut ServerState, _s: &mut Session, args: &[Vec<u8>]) -> RespValue {
    let sub = args[0].to_ascii_uppercase();
    match sub.as_slice() {
        b"CHANNELS" => {
            let pattern = args.get(1).map(Vec::as_slice);
            bulk_array(st.pubsub.channels_matching(pattern))
        }
        b"NUMSUB" => {
            let mut out = Vec::with_capacity((args.len() - 1) * 2);
            for channel in &args[1..] {
                out.push(RespValue::bulk(channel.clone()));
                out.push(RespValue::Integer(st.pubsub.subscriber_count(channel) as i64));
            }
            RespValue::Array(Some(out))
        }
        b"NUMPAT" => RespValue::Integer(st.pubsub.pattern_count() as i64),
        _ => RespValue::error(format!(
            "ERR Unknown PUBSUB subcommand or wrong number of arguments for '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}
