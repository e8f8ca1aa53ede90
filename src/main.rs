fn main() -> anyhow::Result<()> {
    tollgate::init_tracing();
    let code = tollgate::run()?;
    std::process::exit(code);
}
