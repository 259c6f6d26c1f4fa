fn main() {
    if let Err(e) = sustain_form_lib::run() {
        eprintln!("sustain-form: {e}");
        std::process::exit(1);
    }
}
