fn main() {
    if let Err(err) = chatrelay::cli::main() {
        eprintln!("❌ Error: {err}");
        std::process::exit(1);
    }
}
