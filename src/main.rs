fn main() -> anyhow::Result<()> {
    shelfwatch_lib::run()
}
