//! hk - short alias for hostkeep

fn main() -> anyhow::Result<()> {
    hostkeep::run()
}
