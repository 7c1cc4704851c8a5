use clap::Parser;

fn main() {
    let args = snesobj::cli::Args::parse();
    if let Err(err) = snesobj::cli::run(&args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
