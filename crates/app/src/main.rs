use std::process;

mod headless;
mod logging;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = headless::run(&args) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}
