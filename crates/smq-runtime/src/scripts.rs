//! Atomic queue scripts.
//!
//! Each script pairs a Lua body (for Redis) with a native function (for the
//! in-memory store). Both renditions take the same keys and arguments and
//! reply with the same shape; the leading integer of every reply is one of the
//! [`status`] codes.

use crate::error::StoreError;
use crate::keys::{attribute, message_field, message_fields};
use crate::message::Timestamp;
use crate::store::{
    arg_i64, arg_str, int_value, key, Script, ScriptContext, ScriptValue, SCORE_MAX, SCORE_MIN,
};
use bytes::Bytes;

#[cfg(test)]
#[path = "scripts_tests.rs"]
mod tests;

/// Leading status code of every script reply
pub mod status {
    pub const QUEUE_NOT_FOUND: i64 = 0;
    pub const OK: i64 = 1;
    pub const MESSAGE_NOT_FOUND: i64 = 2;
    pub const TOO_LARGE: i64 = 3;
    pub const EMPTY: i64 = 4;
    pub const EXISTS: i64 = 5;
}

/// Argument flag asking the receive script to delete the claimed message
pub const POP_FLAG: &str = "1";

macro_rules! lua {
    ($file:literal) => {
        concat!(
            include_str!("scripts/common.lua"),
            include_str!(concat!("scripts/", $file))
        )
    };
}

/// KEYS: queues, attributes. ARGV: name, vt, delay, maxsize.
/// Reply: `OK` or `EXISTS`.
pub static CREATE_QUEUE: Script = Script::new("create_queue", lua!("create_queue.lua"), create_queue);

/// KEYS: attributes, messages, ready, hidden.
/// Reply: `[OK, vt, delay, maxsize, created, modified, totalsent, totalrecv,
/// ready, delayed, hidden]`.
pub static QUEUE_ATTRIBUTES: Script = Script::new(
    "queue_attributes",
    lua!("queue_attributes.lua"),
    queue_attributes,
);

/// KEYS: attributes. ARGV: vt, delay, maxsize, each empty when unchanged.
/// Reply: `OK`.
pub static SET_QUEUE_ATTRIBUTES: Script = Script::new(
    "set_queue_attributes",
    lua!("set_queue_attributes.lua"),
    set_queue_attributes,
);

/// KEYS: queues, attributes, messages, ready, hidden. ARGV: name.
/// Reply: 1 when the queue existed, else 0.
pub static DELETE_QUEUE: Script = Script::new("delete_queue", lua!("delete_queue.lua"), delete_queue);

/// KEYS: attributes, messages, ready, hidden. ARGV: queue, suffix, body,
/// delay. Reply: `[OK, seq, sent, ready_at]` or `[TOO_LARGE, maxsize]`.
pub static SEND_MESSAGE: Script = Script::new("send_message", lua!("send_message.lua"), send_message);

/// KEYS: attributes, messages, ready, hidden. ARGV: vt, pop flag.
/// Reply: `[OK, id, body, rc, fr, sent, hidden_until, now]` (`hidden_until`
/// is -1 for a pop) or `[EMPTY]`.
pub static RECEIVE_MESSAGE: Script = Script::new(
    "receive_message",
    lua!("receive_message.lua"),
    receive_message,
);

/// KEYS: attributes, messages, ready, hidden. ARGV: id.
/// Reply: `OK` or `MESSAGE_NOT_FOUND`.
pub static DELETE_MESSAGE: Script = Script::new(
    "delete_message",
    lua!("delete_message.lua"),
    delete_message,
);

/// KEYS: attributes, messages, ready, hidden. ARGV: id, vt.
/// Reply: `[OK, hidden_until]` or `[MESSAGE_NOT_FOUND]`.
pub static CHANGE_VISIBILITY: Script = Script::new(
    "change_visibility",
    lua!("change_visibility.lua"),
    change_visibility,
);

/// KEYS: attributes, messages, ready, hidden.
/// Reply: `[OK, released]`.
pub static RELEASE_EXPIRED: Script = Script::new(
    "release_expired",
    lua!("release_expired.lua"),
    release_expired_script,
);

// ============================================================================
// Reply decoding
// ============================================================================

/// Split a reply into its status code and remaining values
pub(crate) fn split_status(reply: ScriptValue) -> Result<(i64, Vec<ScriptValue>), StoreError> {
    match reply {
        ScriptValue::Int(code) => Ok((code, Vec::new())),
        ScriptValue::Array(items) => {
            let mut items = items.into_iter();
            let code = items
                .next()
                .ok_or_else(|| StoreError::unexpected("empty script reply"))?
                .as_i64()?;
            Ok((code, items.collect()))
        }
        other => Err(StoreError::unexpected(format!(
            "expected a status reply, got {:?}",
            other
        ))),
    }
}

/// Take the next value of a reply
pub(crate) fn next_value(
    values: &mut impl Iterator<Item = ScriptValue>,
    what: &str,
) -> Result<ScriptValue, StoreError> {
    values
        .next()
        .ok_or_else(|| StoreError::unexpected(format!("reply is missing {}", what)))
}

/// Interpret a store value as a Unix-millisecond timestamp
pub(crate) fn timestamp(value: &ScriptValue, what: &str) -> Result<Timestamp, StoreError> {
    let millis = value.as_i64()?;
    Timestamp::from_millis(millis)
        .ok_or_else(|| StoreError::unexpected(format!("{} {} is out of range", what, millis)))
}

/// Error for a status code the calling operation does not expect
pub(crate) fn unexpected_status(script: &Script, code: i64) -> StoreError {
    StoreError::unexpected(format!(
        "script '{}' replied with unexpected status {}",
        script.name(),
        code
    ))
}

// ============================================================================
// Native renditions
// ============================================================================

fn field(id: &str, suffix: &str) -> String {
    format!("{}{}", id, suffix)
}

fn parse_i64(raw: &Bytes, what: &str) -> Result<i64, StoreError> {
    ScriptValue::Data(raw.clone())
        .as_i64()
        .map_err(|_| StoreError::unexpected(format!("{} is not an integer", what)))
}

fn required_i64(
    context: &dyn ScriptContext,
    hash: &str,
    name: &str,
) -> Result<i64, StoreError> {
    let raw = context
        .hget(hash, name)
        .ok_or_else(|| StoreError::unexpected(format!("missing field '{}' in {}", name, hash)))?;
    parse_i64(&raw, name)
}

fn optional_value(context: &dyn ScriptContext, hash: &str, name: &str) -> ScriptValue {
    context
        .hget(hash, name)
        .map(ScriptValue::Data)
        .unwrap_or(ScriptValue::Nil)
}

/// Override argument, or the queue attribute when the argument is empty
fn override_or_default(
    context: &dyn ScriptContext,
    args: &[Bytes],
    index: usize,
    attributes: &str,
    name: &str,
) -> Result<i64, StoreError> {
    if arg_str(args, index)?.is_empty() {
        required_i64(context, attributes, name)
    } else {
        arg_i64(args, index)
    }
}

fn release_expired(
    context: &mut dyn ScriptContext,
    messages: &str,
    ready: &str,
    hidden: &str,
    now: i64,
) -> Result<i64, StoreError> {
    let expired = context.zrange_by_score(hidden, SCORE_MIN, now, None);
    for (id, _) in &expired {
        let ready_at = context.hget(messages, &field(id, message_field::READY_AT));
        context.zrem(hidden, id);
        if let Some(raw) = ready_at {
            let ready_at = parse_i64(&raw, "ready timestamp")?;
            context.zadd(ready, ready_at, id);
        }
    }
    Ok(expired.len() as i64)
}

fn create_queue(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let queues = key(keys, 0)?;
    let attributes = key(keys, 1)?;
    let name = arg_str(args, 0)?;
    let vt = arg_i64(args, 1)?;

    if !context.hsetnx(attributes, attribute::VISIBILITY_TIMEOUT, int_value(vt)) {
        return Ok(ScriptValue::Int(status::EXISTS));
    }

    let now = context.now_millis();
    context.hset(attributes, attribute::DELAY, int_value(arg_i64(args, 2)?));
    context.hset(attributes, attribute::MAX_SIZE, int_value(arg_i64(args, 3)?));
    context.hset(attributes, attribute::CREATED, int_value(now));
    context.hset(attributes, attribute::MODIFIED, int_value(now));
    context.hset(attributes, attribute::TOTAL_SENT, int_value(0));
    context.hset(attributes, attribute::TOTAL_RECEIVED, int_value(0));
    context.hset(attributes, attribute::SEQUENCE, int_value(0));
    context.sadd(queues, name);
    Ok(ScriptValue::Int(status::OK))
}

fn queue_attributes(
    context: &mut dyn ScriptContext,
    keys: &[String],
    _args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    let ready = key(keys, 2)?;
    let hidden = key(keys, 3)?;

    if !context.exists(attributes) {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::QUEUE_NOT_FOUND)]));
    }

    let now = context.now_millis();
    let mut reply = vec![ScriptValue::Int(status::OK)];
    for name in [
        attribute::VISIBILITY_TIMEOUT,
        attribute::DELAY,
        attribute::MAX_SIZE,
        attribute::CREATED,
        attribute::MODIFIED,
        attribute::TOTAL_SENT,
        attribute::TOTAL_RECEIVED,
    ] {
        reply.push(optional_value(&*context, attributes, name));
    }

    let ready_now = context.zcount(ready, SCORE_MIN, now) + context.zcount(hidden, SCORE_MIN, now);
    let delayed = context.zcount(ready, now.saturating_add(1), SCORE_MAX);
    let hidden_now = context.zcount(hidden, now.saturating_add(1), SCORE_MAX);
    reply.push(ScriptValue::Int(ready_now as i64));
    reply.push(ScriptValue::Int(delayed as i64));
    reply.push(ScriptValue::Int(hidden_now as i64));
    Ok(ScriptValue::Array(reply))
}

fn set_queue_attributes(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    if !context.exists(attributes) {
        return Ok(ScriptValue::Int(status::QUEUE_NOT_FOUND));
    }

    let names = [
        attribute::VISIBILITY_TIMEOUT,
        attribute::DELAY,
        attribute::MAX_SIZE,
    ];
    for (index, name) in names.iter().enumerate() {
        if !arg_str(args, index)?.is_empty() {
            context.hset(attributes, name, int_value(arg_i64(args, index)?));
        }
    }
    let now = context.now_millis();
    context.hset(attributes, attribute::MODIFIED, int_value(now));
    Ok(ScriptValue::Int(status::OK))
}

fn delete_queue(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let existed = context.exists(key(keys, 1)?);
    for index in 1..=4 {
        context.del(key(keys, index)?);
    }
    context.srem(key(keys, 0)?, arg_str(args, 0)?);
    Ok(ScriptValue::Int(i64::from(existed)))
}

fn send_message(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    let messages = key(keys, 1)?;
    let ready = key(keys, 2)?;

    if !context.exists(attributes) {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::QUEUE_NOT_FOUND)]));
    }

    let body = args
        .get(2)
        .cloned()
        .ok_or_else(|| StoreError::unexpected("missing message body"))?;
    let max_size = required_i64(&*context, attributes, attribute::MAX_SIZE)?;
    if body.len() as i64 > max_size {
        return Ok(ScriptValue::Array(vec![
            ScriptValue::Int(status::TOO_LARGE),
            ScriptValue::Int(max_size),
        ]));
    }

    let delay = override_or_default(&*context, args, 3, attributes, attribute::DELAY)?;
    let now = context.now_millis();
    let ready_at = now + delay * 1000;
    let sequence = context.hincrby(attributes, attribute::SEQUENCE, 1)?;
    let id = format!("{}.{:020}.{}", arg_str(args, 0)?, sequence, arg_str(args, 1)?);

    context.hset(messages, &id, body);
    context.hset(messages, &field(&id, message_field::RECEIVE_COUNT), int_value(0));
    context.hset(messages, &field(&id, message_field::SENT), int_value(now));
    context.hset(messages, &field(&id, message_field::READY_AT), int_value(ready_at));
    context.zadd(ready, ready_at, &id);
    context.hincrby(attributes, attribute::TOTAL_SENT, 1)?;

    Ok(ScriptValue::Array(vec![
        ScriptValue::Int(status::OK),
        ScriptValue::Int(sequence),
        ScriptValue::Int(now),
        ScriptValue::Int(ready_at),
    ]))
}

fn receive_message(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    let messages = key(keys, 1)?;
    let ready = key(keys, 2)?;
    let hidden = key(keys, 3)?;

    if !context.exists(attributes) {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::QUEUE_NOT_FOUND)]));
    }

    let now = context.now_millis();
    release_expired(context, messages, ready, hidden, now)?;

    let id = match context.zrange_by_score(ready, SCORE_MIN, now, Some(1)).pop() {
        Some((id, _)) => id,
        None => return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::EMPTY)])),
    };

    let body = optional_value(&*context, messages, &id);
    let receive_count = context.hincrby(messages, &field(&id, message_field::RECEIVE_COUNT), 1)?;
    context.hsetnx(messages, &field(&id, message_field::FIRST_RECEIVED), int_value(now));
    let first_received = optional_value(&*context, messages, &field(&id, message_field::FIRST_RECEIVED));
    let sent = optional_value(&*context, messages, &field(&id, message_field::SENT));
    context.zrem(ready, &id);
    context.hincrby(attributes, attribute::TOTAL_RECEIVED, 1)?;

    let hidden_until = if arg_str(args, 1)? == POP_FLAG {
        context.hdel(messages, &message_fields(&id));
        -1
    } else {
        let vt = override_or_default(&*context, args, 0, attributes, attribute::VISIBILITY_TIMEOUT)?;
        let deadline = now + vt * 1000;
        context.zadd(hidden, deadline, &id);
        deadline
    };

    Ok(ScriptValue::Array(vec![
        ScriptValue::Int(status::OK),
        ScriptValue::text(id),
        body,
        ScriptValue::Int(receive_count),
        first_received,
        sent,
        ScriptValue::Int(hidden_until),
        ScriptValue::Int(now),
    ]))
}

fn delete_message(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    let messages = key(keys, 1)?;
    let ready = key(keys, 2)?;
    let hidden = key(keys, 3)?;

    if !context.exists(attributes) {
        return Ok(ScriptValue::Int(status::QUEUE_NOT_FOUND));
    }

    let id = arg_str(args, 0)?;
    let from_ready = context.zrem(ready, id);
    let from_hidden = context.zrem(hidden, id);
    let fields = context.hdel(messages, &message_fields(id));
    if !from_ready && !from_hidden && fields == 0 {
        return Ok(ScriptValue::Int(status::MESSAGE_NOT_FOUND));
    }
    Ok(ScriptValue::Int(status::OK))
}

fn change_visibility(
    context: &mut dyn ScriptContext,
    keys: &[String],
    args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    let messages = key(keys, 1)?;
    let ready = key(keys, 2)?;
    let hidden = key(keys, 3)?;

    if !context.exists(attributes) {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::QUEUE_NOT_FOUND)]));
    }

    let now = context.now_millis();
    release_expired(context, messages, ready, hidden, now)?;

    let id = arg_str(args, 0)?;
    if context.zscore(hidden, id).is_none() {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::MESSAGE_NOT_FOUND)]));
    }

    let deadline = now + arg_i64(args, 1)? * 1000;
    context.zadd(hidden, deadline, id);
    Ok(ScriptValue::Array(vec![
        ScriptValue::Int(status::OK),
        ScriptValue::Int(deadline),
    ]))
}

fn release_expired_script(
    context: &mut dyn ScriptContext,
    keys: &[String],
    _args: &[Bytes],
) -> Result<ScriptValue, StoreError> {
    let attributes = key(keys, 0)?;
    if !context.exists(attributes) {
        return Ok(ScriptValue::Array(vec![ScriptValue::Int(status::QUEUE_NOT_FOUND)]));
    }

    let now = context.now_millis();
    let released = release_expired(context, key(keys, 1)?, key(keys, 2)?, key(keys, 3)?, now)?;
    Ok(ScriptValue::Array(vec![
        ScriptValue::Int(status::OK),
        ScriptValue::Int(released),
    ]))
}
