/// Lua script for the shared sliding window
///
/// Every attempt is stored as a sorted-set member scored with the instant its
/// window ends, so anything scored at or before `now` has left the window.
/// Pruning, counting, recording and the expiry refresh run atomically.
///
/// KEYS[1] = the window key
/// ARGV[1] = current timestamp (nanoseconds since the UNIX epoch)
/// ARGV[2] = expiry score for this attempt (now + window, nanoseconds)
/// ARGV[3] = key TTL (milliseconds)
/// ARGV[4] = unique member for this attempt
///
/// Returns: number of attempts in the window before this one
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = ARGV[1]
local expires_at = ARGV[2]
local ttl_ms = tonumber(ARGV[3])
local member = ARGV[4]

-- Remove attempts whose window has ended
redis.call('ZREMRANGEBYSCORE', key, '-inf', now)

-- Count attempts still inside the window
local count = redis.call('ZCARD', key)

-- Record this attempt and bound the key lifetime
redis.call('ZADD', key, expires_at, member)
redis.call('PEXPIRE', key, ttl_ms)

return count
"#;
