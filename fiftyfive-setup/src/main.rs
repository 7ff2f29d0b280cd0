fn main() {
    if let Err(err) = fiftyfive_bridge::app::run_setup() {
        eprintln!("setup failed: {err}");
        std::process::exit(1);
    }
}
