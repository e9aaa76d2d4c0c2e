mod pool;

pub use pool::PoolState;
