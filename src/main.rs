fn main() {
    let res = deadlock_finder::cli::run();
    if let Err(err) = res {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
