#[cfg(test)]
#[ctor::ctor]
fn init_tests() {
    // one subscriber for every unit test, filtered by RUST_LOG
    crate::test_utilities::init_tracing();
}
