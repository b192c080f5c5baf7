fn main() {
    // Propagate ESP-IDF link/cfg args from esp-idf-sys. Harmless on host
    // builds, where nothing sets them.
    if let Err(err) = embuild::build::LinkArgs::output_propagated("ESP_IDF") {
        println!("cargo:warning=esp-idf link args not propagated: {err}");
    }
    if let Err(err) = embuild::build::CfgArgs::output_propagated("ESP_IDF") {
        println!("cargo:warning=esp-idf cfg args not propagated: {err}");
    }

    println!("cargo:rerun-if-env-changed=VIVARIUM_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=VIVARIUM_WIFI_PASS");
}
