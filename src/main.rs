fn main() {
    if let Err(err) = tabular_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
