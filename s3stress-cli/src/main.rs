fn main() -> anyhow::Result<()> {
    s3stress_cli::cli::execute()
}
