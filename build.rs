// Build script to compile the GLSL triangle shaders to the SPIR-V blobs
// the renderer loads at startup. The renderer itself never compiles shaders.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/triangle.vert");
    println!("cargo:rerun-if-changed=shaders/triangle.frag");

    compile_shader("shaders/triangle.vert", "shaders/vert.spv");
    compile_shader("shaders/triangle.frag", "shaders/frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // glslc ships with the Vulkan SDK
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}); {} was not built", e, output);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
