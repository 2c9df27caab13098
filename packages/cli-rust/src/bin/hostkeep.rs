//! hostkeep - bootstrap and harden remote Linux hosts over SSH

fn main() -> anyhow::Result<()> {
    hostkeep::run()
}
