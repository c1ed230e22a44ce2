fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .format(false)
        .type_attribute(".", "#[derive(::serde::Serialize, ::serde::Deserialize)]")
        .field_attribute("actor.PID.address", "#[serde(alias = \"Address\")]")
        .field_attribute("actor.PID.id", "#[serde(alias = \"Id\")]")
        .compile(&["proto/actor.proto", "proto/remote.proto"], &["proto"])?;
    Ok(())
}
