fn main() {
    if let Err(e) = tsqa::cli::run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
