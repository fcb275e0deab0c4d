fn main() {
    let code = evalboard_cli::run_cli(std::env::args_os());
    if code != 0 {
        std::process::exit(code);
    }
}
