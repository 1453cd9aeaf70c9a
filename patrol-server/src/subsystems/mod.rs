pub mod monitor;
pub mod patrols;

#[cfg(test)]
pub(crate) mod test_support;
