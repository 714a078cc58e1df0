fn main() {
    println!("cargo:rerun-if-changed=proto/candidate_geo_data.proto");
    prost_build::compile_protos(&["proto/candidate_geo_data.proto"], &["proto"])
        .expect("failed to compile candidate_geo_data.proto");
}
