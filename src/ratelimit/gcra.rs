//! The Generic Cell Rate Algorithm.
//!
//! Each key is represented by a single persisted scalar, its theoretical
//! arrival time (TAT): the time at which the key's bucket would be exactly
//! empty if events kept being granted at the configured rate. A missing key
//! is equivalent to `TAT = now`, i.e. full burst capacity.
//!
//! The procedure exists in two renditions that must stay arithmetically
//! identical: the Lua scripts below, which Redis executes atomically with its
//! own `TIME`, and [`evaluate`], which in-process stores run under a per-key
//! lock with their own clock. Redis truncates Lua numbers to integers when
//! replying, so [`evaluate`] truncates `allowed` and `remaining` the same way.

use std::time::Duration;

use super::store::{RawReply, Script, ScriptArgs};

/// Exact-count variant: grants all `count` events or none.
pub const ALLOW_N_SCRIPT: &str = r#"
local rate_limit_key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local emission_interval = period / rate
local increment = emission_interval * cost
local burst_offset = emission_interval * burst

-- Seconds since 2017-01-01 keep the float well inside double precision.
local jan_1_2017 = 1483228800
local now = redis.call("TIME")
now = (now[1] - jan_1_2017) + (now[2] / 1000000)

local tat = redis.call("GET", rate_limit_key)
if not tat then
  tat = now
else
  tat = tonumber(tat)
end
tat = math.max(tat, now)

local new_tat = tat + increment
local allow_at = new_tat - burst_offset

local diff = now - allow_at
local remaining = diff / emission_interval

if remaining < 0 then
  local reset_after = tat - now
  local retry_after = diff * -1
  return {0, 0, tostring(retry_after), tostring(reset_after)}
end

local reset_after = new_tat - now
if reset_after > 0 then
  redis.call("SET", rate_limit_key, new_tat, "EX", math.ceil(reset_after))
end

return {cost, remaining, tostring(-1), tostring(reset_after)}
"#;

/// At-most variant: grants as many of `count` events as are available.
pub const ALLOW_AT_MOST_SCRIPT: &str = r#"
local rate_limit_key = KEYS[1]
local burst = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local period = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local emission_interval = period / rate
local burst_offset = emission_interval * burst

-- Seconds since 2017-01-01 keep the float well inside double precision.
local jan_1_2017 = 1483228800
local now = redis.call("TIME")
now = (now[1] - jan_1_2017) + (now[2] / 1000000)

local tat = redis.call("GET", rate_limit_key)
if not tat then
  tat = now
else
  tat = tonumber(tat)
end
tat = math.max(tat, now)

local diff = now - (tat - burst_offset)
local remaining = diff / emission_interval

if remaining < 1 then
  local reset_after = tat - now
  local retry_after = emission_interval - diff
  return {0, 0, tostring(retry_after), tostring(reset_after)}
end

if remaining < cost then
  cost = remaining
  remaining = 0
else
  remaining = remaining - cost
end

local increment = emission_interval * cost
local new_tat = tat + increment

local reset_after = new_tat - now
if reset_after > 0 then
  redis.call("SET", rate_limit_key, new_tat, "EX", math.ceil(reset_after))
end

return {cost, remaining, tostring(-1), tostring(reset_after)}
"#;

impl Script {
    /// Lua source the store evaluates for this variant.
    pub fn source(&self) -> &'static str {
        match self {
            Script::AllowN => ALLOW_N_SCRIPT,
            Script::AllowAtMost => ALLOW_AT_MOST_SCRIPT,
        }
    }
}

/// New state to persist after a grant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TatUpdate {
    /// New theoretical arrival time, in the store's clock domain
    pub tat: f64,
    /// Expiry for the key, `ceil(reset_after)` seconds
    pub ttl: Duration,
}

/// Result of running the procedure against one key's state.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: RawReply,
    /// `None` when the key must be left untouched
    pub update: Option<TatUpdate>,
}

/// Run one GCRA evaluation.
///
/// `stored_tat` is the key's persisted value (or `None` if absent or
/// expired) and `now` is read from the store's clock. The caller is
/// responsible for applying `update` atomically with the read.
pub fn evaluate(script: Script, stored_tat: Option<f64>, now: f64, args: &ScriptArgs) -> Outcome {
    let emission_interval = args.emission_interval();
    let burst_offset = args.burst_offset();
    let tat = stored_tat.unwrap_or(now).max(now);

    match script {
        Script::AllowN => allow_n(tat, now, emission_interval, burst_offset, args.count as f64),
        Script::AllowAtMost => {
            allow_at_most(tat, now, emission_interval, burst_offset, args.count as f64)
        }
    }
}

fn allow_n(tat: f64, now: f64, emission_interval: f64, burst_offset: f64, cost: f64) -> Outcome {
    let increment = emission_interval * cost;
    let new_tat = tat + increment;
    let allow_at = new_tat - burst_offset;

    let diff = now - allow_at;
    let remaining = diff / emission_interval;

    if remaining < 0.0 {
        return denied(-diff, tat - now);
    }

    granted(cost, remaining, new_tat, now)
}

fn allow_at_most(
    tat: f64,
    now: f64,
    emission_interval: f64,
    burst_offset: f64,
    cost: f64,
) -> Outcome {
    let diff = now - (tat - burst_offset);
    let available = diff / emission_interval;

    if available < 1.0 {
        return denied(emission_interval - diff, tat - now);
    }

    let (cost, remaining) = if available < cost {
        (available, 0.0)
    } else {
        (cost, available - cost)
    };
    let new_tat = tat + emission_interval * cost;

    granted(cost, remaining, new_tat, now)
}

fn denied(retry_after: f64, reset_after: f64) -> Outcome {
    Outcome {
        reply: RawReply {
            allowed: 0,
            remaining: 0,
            retry_after: retry_after.to_string(),
            reset_after: reset_after.to_string(),
        },
        update: None,
    }
}

fn granted(cost: f64, remaining: f64, new_tat: f64, now: f64) -> Outcome {
    let reset_after = new_tat - now;
    let update = (reset_after > 0.0).then(|| TatUpdate {
        tat: new_tat,
        ttl: Duration::from_secs(reset_after.ceil() as u64),
    });

    Outcome {
        reply: RawReply {
            // Redis replies with Lua numbers truncated toward zero.
            allowed: cost as i64,
            remaining: remaining as i64,
            retry_after: (-1.0f64).to_string(),
            reset_after: reset_after.to_string(),
        },
        update,
    }
}
