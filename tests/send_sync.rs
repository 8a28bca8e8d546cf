//! Send/Sync guarantees for core types.

use agentlog::{
    AgentHandler, AgentHandlerBuilder, AgentLogAdapter, CountingMetrics, NoopMetrics,
    ThreadLocalContext,
    transport::{BacklogBuffer, IoWorker},
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn builders_are_send_sync() {
    assert_impl_all!(AgentHandlerBuilder: Send, Sync, Clone);
}

#[rstest]
fn components_are_send_sync() {
    assert_impl_all!(AgentHandler: Send, Sync);
    assert_impl_all!(BacklogBuffer: Send, Sync);
    assert_impl_all!(IoWorker: Send, Sync);
    assert_impl_all!(AgentLogAdapter: Send, Sync);
    assert_impl_all!(CountingMetrics: Send, Sync);
    assert_impl_all!(NoopMetrics: Send, Sync);
    assert_impl_all!(ThreadLocalContext: Send, Sync);
}
