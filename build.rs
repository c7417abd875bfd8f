fn main() {
    // Build scripts run on the host; only hand over to the ESP-IDF build
    // system when the target triple is an ESP-IDF one (xtensa or riscv).
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.ends_with("-espidf") {
        embuild::espidf::sysenv::output();
    }
}
