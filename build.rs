use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // 主机测试 (未启用 esp32s3) 不需要任何链接配置
    if env::var_os("CARGO_FEATURE_ESP32S3").is_none() {
        return;
    }

    // esp-hal 1.0 提供完整链接脚本, 只对板级二进制生效
    println!("cargo:rustc-link-arg-bins=-Tlinkall.x");

    // 添加 ld 目录到链接路径（如果有自定义链接脚本）
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        println!("cargo:rustc-link-search={}/ld", manifest_dir);
    }
}
