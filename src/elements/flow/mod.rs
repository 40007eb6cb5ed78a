//! Flow control and routing elements.

mod funnel;
mod queue;
mod tee;
mod valve;

pub(crate) use funnel::factory as funnel_factory;
pub(crate) use queue::factory as queue_factory;
pub(crate) use tee::factory as tee_factory;
pub(crate) use valve::factory as valve_factory;
