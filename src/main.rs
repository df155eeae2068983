use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use shader_graph_compiler::compiler::shader::ShaderVariant;
use shader_graph_compiler::compiler::{NagaOptimizer, Pass};
use shader_graph_compiler::{
    Compiler, CompilerConfig, DirectoryResolver, Material, ShaderDocument,
};

#[derive(Debug, Default, Clone)]
struct Cli {
    shader: Option<PathBuf>,
    root: Option<PathBuf>,
    material: Option<PathBuf>,
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    no_optimize: bool,
    gles: bool,
}

const USAGE: &str = "supported: --shader <doc.json>, --root <dir>, --material <mat.json>, \
    --config <cfg.json>, --output-dir <dir>, --no-optimize, --gles";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag {
            "--shader" => cli.shader = Some(value()?),
            "--root" => cli.root = Some(value()?),
            "--material" => cli.material = Some(value()?),
            "--config" => cli.config = Some(value()?),
            "--outputdir" | "--output-dir" => cli.output_dir = Some(value()?),
            "--no-optimize" => {
                cli.no_optimize = true;
                i += 1;
                continue;
            }
            "--gles" => {
                cli.gles = true;
                i += 1;
                continue;
            }
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
        i += 2;
    }
    Ok(cli)
}

fn write_output(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("[shaderc] wrote {}", path.display());
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let shader_path = cli
        .shader
        .ok_or_else(|| anyhow!("--shader <doc.json> is required ({USAGE})"))?;
    let root = cli.root.unwrap_or_else(|| {
        shader_path
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    let output_dir = cli.output_dir.unwrap_or_else(|| PathBuf::from("."));

    let mut config = match cli.config.as_deref() {
        Some(path) => CompilerConfig::load_from_path(path)?,
        None => CompilerConfig::default(),
    };
    if cli.no_optimize {
        config.optimize = false;
    }
    if cli.gles {
        config.gles = true;
    }
    let material = match cli.material.as_deref() {
        Some(path) => Material::load_from_path(path)?,
        None => Material::default(),
    };

    let document = ShaderDocument::load_from_path(&shader_path)?;
    let mut compiler =
        Compiler::new(config, DirectoryResolver::new(root)).with_optimizer(NagaOptimizer);
    let shader = compiler.load_document(document, ShaderVariant::of(&material))?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let passes: Vec<Pass> = shader.passes().collect();
    for pass in passes {
        let compiled = compiler
            .compile_pass(&shader, pass, &material)
            .with_context(|| format!("failed to compile {} pass {pass}", shader.name()))?;
        let stem = format!("{}.{pass}", shader.name());
        write_output(&output_dir, &format!("{stem}.vert.glsl"), compiled.vertex.as_bytes())?;
        write_output(&output_dir, &format!("{stem}.frag.glsl"), compiled.fragment.as_bytes())?;
    }

    let cooked = compiler.cook_shader(&shader, &material)?;
    write_output(&output_dir, &format!("{}.cooked", shader.name()), &cooked)?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    if let Err(e) = run(cli) {
        log::error!("[shaderc] {e:#}");
        return Err(e);
    }
    Ok(())
}
