use std::process;
use wsgate::cli::CLI;

fn main() {
    let cli = CLI::new();

    if let Err(err) = cli.execute() {
        eprintln!("{}", err);
        process::exit(1);
    }
}
