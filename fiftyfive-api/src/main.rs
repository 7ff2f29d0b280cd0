fn main() {
    if let Err(err) = fiftyfive_bridge::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
