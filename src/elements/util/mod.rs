//! Utility elements.

mod capsfilter;

pub(crate) use capsfilter::factory as capsfilter_factory;
