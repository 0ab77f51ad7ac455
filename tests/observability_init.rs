//! Runs in its own test binary: `init_tracing` installs a process-wide
//! subscriber, which would hide log lines from `#[traced_test]` tests in the
//! library test binary.

use nodeflow::observability::init_tracing;

#[test]
fn init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
