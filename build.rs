use std::{env, fs::File, io::Write, path::Path};

fn main() {
    write_protocol_version_to_constants();
}

// The protocol version travels in every envelope as an integer derived from the
// crate version: 100 * major + 10 * minor + patch. It is computed here so that
// the value is a plain const at compile time.
// The value can also be overridden by an environmental variable, e.g. to talk
// to peers pinned to an older protocol:
// SYNAPSE_PROTOCOL_VERSION=360 cargo build

fn write_protocol_version_to_constants() {
    let out_dir = env::var("OUT_DIR").expect("No out dir");
    let dest_path = Path::new(&out_dir).join("constants.rs");
    let package_version = env::var("CARGO_PKG_VERSION").expect("No package version");
    let version = env::var("SYNAPSE_PROTOCOL_VERSION")
        .ok()
        .map(|value| value.parse::<u32>().expect("Could not parse SYNAPSE_PROTOCOL_VERSION"))
        .unwrap_or_else(|| version_as_int(&package_version));
    let mut f = File::create(&dest_path).expect("Could not create file");
    write!(&mut f, "pub const VERSION_AS_INT: u32 = {};", version).expect("Could not write file");
    println!("cargo:rerun-if-env-changed=SYNAPSE_PROTOCOL_VERSION");
}

fn version_as_int(version: &str) -> u32 {
    let parts: Vec<u32> = version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect();
    let get = |idx: usize| parts.get(idx).copied().unwrap_or(0);
    100 * get(0) + 10 * get(1) + get(2)
}
