fn main() {
    let args = std::env::args();

    if let Err(err) = lentochka::run(args) {
        // Logging may not be up yet when configuration loading fails.
        eprintln!("lentochka error: {err:#}");
        std::process::exit(1);
    }
}
