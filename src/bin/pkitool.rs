use colored::Colorize;
use vpntool::cli::{init_logging, run_pkitool};

fn main() {
    init_logging();
    if let Err(e) = run_pkitool() {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
