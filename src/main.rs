fn main() -> anyhow::Result<()> {
    ham_radio_lib::run()
}
