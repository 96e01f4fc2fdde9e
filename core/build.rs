fn main() {
    uniffi::generate_scaffolding("src/divesync.udl").unwrap();
}
