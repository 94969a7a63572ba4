mod lockfree;

pub use lockfree::LockFreeQueue;
