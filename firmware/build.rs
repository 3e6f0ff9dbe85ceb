fn main() {
    // embuild wires in the ESP-IDF toolchain environment. On host targets
    // (unit/integration tests, simulation runs) there is nothing to emit.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
