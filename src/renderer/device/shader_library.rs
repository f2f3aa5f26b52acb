//! WGSL sources and the small preprocessor that turns them into variants.
//!
//! Supported directives, each on its own line:
//!
//! - `#include "File.wgsl"` pastes another library file, once per variant.
//! - `#ifdef NAME` / `#ifndef NAME` / `#else` / `#endif` test the compile defines.
//! - `#repeat NAME` / `#endrepeat` emit the block as many times as the value
//!   of define `NAME`, replacing `REPEAT_INDEX` with 0, 1, ...
//!
//! After the directives, identifiers naming a define are replaced by its value.
//! `TEXTURE_SLOT`, `SAMPLER_SLOT` and `VERTEX_LOCATION` are counters: every
//! occurrence becomes the next integer, so declarations surviving the
//! conditionals get consecutive binding slots and input locations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{RenderError, RenderResult};
use crate::renderer::device::{ShaderCompileSettings, ViewDimension};

const MAX_INCLUDE_DEPTH: usize = 16;
const REPEAT_INDEX: &str = "REPEAT_INDEX";
const COUNTERS: [&str; 3] = ["TEXTURE_SLOT", "SAMPLER_SLOT", "VERTEX_LOCATION"];

const BUILTIN_SHADERS: &[(&str, &str)] = &[
    ("Common.wgsl", include_str!("../../../shaders/Common.wgsl")),
    ("Lights.wgsl", include_str!("../../../shaders/Lights.wgsl")),
    ("PBR_Common.wgsl", include_str!("../../../shaders/PBR_Common.wgsl")),
    ("PBR_VS.wgsl", include_str!("../../../shaders/PBR_VS.wgsl")),
    ("PBR_PS.wgsl", include_str!("../../../shaders/PBR_PS.wgsl")),
    ("Unlit_VS.wgsl", include_str!("../../../shaders/Unlit_VS.wgsl")),
    ("Unlit_PS.wgsl", include_str!("../../../shaders/Unlit_PS.wgsl")),
    ("ClearGBuffer_VS.wgsl", include_str!("../../../shaders/ClearGBuffer_VS.wgsl")),
    ("ClearGBuffer_PS.wgsl", include_str!("../../../shaders/ClearGBuffer_PS.wgsl")),
    ("DeferredLight_VS.wgsl", include_str!("../../../shaders/DeferredLight_VS.wgsl")),
    ("DeferredLight_PS.wgsl", include_str!("../../../shaders/DeferredLight_PS.wgsl")),
    ("Skybox_VS.wgsl", include_str!("../../../shaders/Skybox_VS.wgsl")),
    ("Skybox_PS.wgsl", include_str!("../../../shaders/Skybox_PS.wgsl")),
];

/// What a `@group(g) @binding(b)` declaration expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Uniform,
    Texture { dimension: ViewDimension, depth: bool },
    Sampler { comparison: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderBinding {
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Named WGSL sources.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    sources: HashMap<String, String>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shaders of every built-in material.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (name, source) in BUILTIN_SHADERS {
            library.insert(*name, *source);
        }
        library
    }

    /// Adds or replaces a source.
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn source(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    /// Final WGSL for one variant. `settings.includes` are pasted ahead of the
    /// file itself.
    pub fn preprocess(&self, settings: &ShaderCompileSettings) -> RenderResult<String> {
        let file = settings.filename.as_str();
        let source = self.source(file).ok_or_else(|| compile_error(file, "shader source not found"))?;

        let mut included = BTreeSet::new();
        let mut lines = Vec::new();
        for include in &settings.includes {
            self.resolve(file, include, &settings.defines, &mut included, &mut lines, 1)?;
        }
        included.insert(file.to_string());
        self.expand(file, source, &settings.defines, &mut included, &mut lines, 0)?;

        let lines = expand_repeats(file, lines, &settings.defines)?;
        Ok(substitute(&lines.join("\n"), &settings.defines))
    }

    fn resolve(
        &self,
        file: &str,
        include: &str,
        defines: &BTreeMap<String, String>,
        included: &mut BTreeSet<String>,
        output: &mut Vec<String>,
        depth: usize,
    ) -> RenderResult<()> {
        if !included.insert(include.to_string()) {
            return Ok(());
        }
        if depth > MAX_INCLUDE_DEPTH {
            return Err(compile_error(file, format!("include depth exceeded at {include}")));
        }
        let source = self
            .source(include)
            .ok_or_else(|| compile_error(file, format!("included file {include} not found")))?;
        self.expand(include, source, defines, included, output, depth)
    }

    /// Applies includes and conditionals; repeat markers pass through.
    fn expand(
        &self,
        file: &str,
        source: &str,
        defines: &BTreeMap<String, String>,
        included: &mut BTreeSet<String>,
        output: &mut Vec<String>,
        depth: usize,
    ) -> RenderResult<()> {
        let mut conditions = ConditionStack::default();
        for (number, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            let Some(directive) = trimmed.strip_prefix('#') else {
                if conditions.active() {
                    output.push(line.to_string());
                }
                continue;
            };
            let (keyword, argument) = match directive.split_once(char::is_whitespace) {
                Some((keyword, argument)) => (keyword, argument.trim()),
                None => (directive, ""),
            };
            let at = |message: &str| compile_error(file, format!("line {}: {message}", number + 1));
            match keyword {
                "ifdef" => conditions.push(defines.contains_key(argument)),
                "ifndef" => conditions.push(!defines.contains_key(argument)),
                "else" => conditions.flip().map_err(|message| at(message))?,
                "endif" => conditions.pop().map_err(|message| at(message))?,
                "include" if conditions.active() => {
                    let name = argument.trim_matches('"');
                    self.resolve(file, name, defines, included, output, depth + 1)?;
                }
                "include" => {}
                "repeat" | "endrepeat" => {
                    if conditions.active() {
                        output.push(trimmed.to_string());
                    }
                }
                _ => return Err(at(&format!("unknown directive #{keyword}"))),
            }
        }
        if !conditions.is_empty() {
            return Err(compile_error(file, "unterminated #ifdef"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConditionStack {
    // (enclosing block active, condition, in #else)
    frames: Vec<(bool, bool, bool)>,
}

impl ConditionStack {
    fn active(&self) -> bool {
        self.frames
            .last()
            .map_or(true, |&(parent, condition, in_else)| parent && (condition != in_else))
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn push(&mut self, condition: bool) {
        let parent = self.active();
        self.frames.push((parent, condition, false));
    }

    fn flip(&mut self) -> Result<(), &'static str> {
        match self.frames.last_mut() {
            Some((_, _, in_else)) if !*in_else => {
                *in_else = true;
                Ok(())
            }
            Some(_) => Err("duplicate #else"),
            None => Err("#else without #ifdef"),
        }
    }

    fn pop(&mut self) -> Result<(), &'static str> {
        self.frames.pop().map(|_| ()).ok_or("#endif without #ifdef")
    }
}

fn expand_repeats(
    file: &str,
    lines: Vec<String>,
    defines: &BTreeMap<String, String>,
) -> RenderResult<Vec<String>> {
    let mut output = Vec::with_capacity(lines.len());
    let mut block: Option<(usize, Vec<String>)> = None;
    for line in lines {
        if let Some(name) = line.strip_prefix("#repeat") {
            if block.is_some() {
                return Err(compile_error(file, "nested #repeat"));
            }
            let name = name.trim();
            let count = defines
                .get(name)
                .and_then(|value| value.parse::<usize>().ok())
                .ok_or_else(|| compile_error(file, format!("#repeat needs a numeric define {name}")))?;
            block = Some((count, Vec::new()));
        } else if line == "#endrepeat" {
            let (count, body) = block
                .take()
                .ok_or_else(|| compile_error(file, "#endrepeat without #repeat"))?;
            for index in 0..count {
                let index = index.to_string();
                output.extend(body.iter().map(|line| line.replace(REPEAT_INDEX, &index)));
            }
        } else if let Some((_, body)) = block.as_mut() {
            body.push(line);
        } else {
            output.push(line);
        }
    }
    if block.is_some() {
        return Err(compile_error(file, "unterminated #repeat"));
    }
    Ok(output)
}

/// Replaces define names and counters, identifier by identifier.
fn substitute(source: &str, defines: &BTreeMap<String, String>) -> String {
    let mut counters = [0u32; COUNTERS.len()];
    let mut output = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            output.push(c);
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(index, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                end = index + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let token = &source[start..end];
        if c.is_ascii_digit() {
            output.push_str(token);
        } else if let Some(counter) = COUNTERS.iter().position(|name| *name == token) {
            output.push_str(&counters[counter].to_string());
            counters[counter] += 1;
        } else if let Some(value) = defines.get(token) {
            output.push_str(value);
        } else {
            output.push_str(token);
        }
    }
    output
}

/// Resource declarations of preprocessed WGSL. One declaration per line.
pub fn reflect_bindings(source: &str) -> RenderResult<Vec<ShaderBinding>> {
    let mut bindings = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        if !line.starts_with("@group(") {
            continue;
        }
        let group = attribute_value(line, "@group(");
        let binding = attribute_value(line, "@binding(");
        let (Some(group), Some(binding)) = (group, binding) else {
            return Err(RenderError::ShaderCompilation {
                file: String::new(),
                message: format!("malformed resource declaration: {line}"),
            });
        };
        let kind = binding_kind(line).ok_or_else(|| RenderError::ShaderCompilation {
            file: String::new(),
            message: format!("unsupported resource type: {line}"),
        })?;
        bindings.push(ShaderBinding { group, binding, kind });
    }
    Ok(bindings)
}

fn attribute_value(line: &str, prefix: &str) -> Option<u32> {
    let start = line.find(prefix)? + prefix.len();
    let end = line[start..].find(')')? + start;
    line[start..end].trim().parse().ok()
}

fn binding_kind(line: &str) -> Option<BindingKind> {
    if line.contains("var<uniform>") {
        return Some(BindingKind::Uniform);
    }
    let ty = line.rsplit_once(':')?.1.trim().trim_end_matches(';').trim();
    let texture = |dimension, depth| Some(BindingKind::Texture { dimension, depth });
    match ty.split('<').next()?.trim() {
        "sampler" => Some(BindingKind::Sampler { comparison: false }),
        "sampler_comparison" => Some(BindingKind::Sampler { comparison: true }),
        "texture_2d" => texture(ViewDimension::D2, false),
        "texture_2d_array" => texture(ViewDimension::D2Array, false),
        "texture_cube" => texture(ViewDimension::Cube, false),
        "texture_depth_2d" => texture(ViewDimension::D2, true),
        "texture_depth_2d_array" => texture(ViewDimension::D2Array, true),
        _ => None,
    }
}

fn compile_error(file: &str, message: impl Into<String>) -> RenderError {
    RenderError::ShaderCompilation {
        file: file.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::features::RendererFeatures;
    use crate::renderer::lights::RenderLightData;
    use crate::renderer::material::{
        ClearGBufferMaterial, DeferredLightMaterial, Material, PbrMaterial, PbrTexture,
        SkyboxMaterial, UnlitMaterial,
    };
    use crate::renderer::render_pass::RenderPassBlendMode;
    use crate::renderer::texture::Texture;
    use crate::renderer::vertex::MeshVertexLayout;
    use std::sync::Arc;

    fn settings(file: &str, defines: &[(&str, &str)]) -> ShaderCompileSettings {
        let mut settings = ShaderCompileSettings::new(file, "main");
        for (name, value) in defines {
            settings.define(name, *value);
        }
        settings
    }

    #[test]
    fn conditionals_follow_the_defines() {
        let mut library = ShaderLibrary::new();
        library.insert(
            "test.wgsl",
            "a\n#ifdef A\nb\n#ifndef B\nc\n#else\nd\n#endif\n#else\ne\n#endif\nf",
        );
        let only_a = library.preprocess(&settings("test.wgsl", &[("A", "1")])).unwrap();
        assert_eq!(only_a, "a\nb\nc\nf");
        let both = library
            .preprocess(&settings("test.wgsl", &[("A", "1"), ("B", "1")]))
            .unwrap();
        assert_eq!(both, "a\nb\nd\nf");
        let none = library.preprocess(&settings("test.wgsl", &[])).unwrap();
        assert_eq!(none, "a\ne\nf");
    }

    #[test]
    fn unbalanced_directives_fail_to_compile() {
        let mut library = ShaderLibrary::new();
        library.insert("open.wgsl", "#ifdef A\nx");
        library.insert("stray.wgsl", "x\n#endif");
        for file in ["open.wgsl", "stray.wgsl", "missing.wgsl"] {
            assert!(matches!(
                library.preprocess(&settings(file, &[])),
                Err(RenderError::ShaderCompilation { .. })
            ));
        }
    }

    #[test]
    fn includes_are_pasted_once() {
        let mut library = ShaderLibrary::new();
        library.insert("common.wgsl", "common");
        library.insert("main.wgsl", "#include \"common.wgsl\"\n#include \"common.wgsl\"\nmain");
        let output = library.preprocess(&settings("main.wgsl", &[])).unwrap();
        assert_eq!(output, "common\nmain");
    }

    #[test]
    fn counters_and_repeats_number_declarations() {
        let mut library = ShaderLibrary::new();
        library.insert(
            "slots.wgsl",
            "@binding(TEXTURE_SLOT) t0\n#ifdef SKIP\n@binding(TEXTURE_SLOT) skipped\n#endif\n\
             #repeat COUNT\n@location(VERTEX_LOCATION) m_REPEAT_INDEX\n#endrepeat\n\
             @binding(TEXTURE_SLOT) t1\nvalue = CUTOFF; 10u",
        );
        let output = library
            .preprocess(&settings("slots.wgsl", &[("COUNT", "2"), ("CUTOFF", "0.25")]))
            .unwrap();
        assert_eq!(
            output,
            "@binding(0) t0\n@location(0) m_0\n@location(1) m_1\n@binding(1) t1\nvalue = 0.25; 10u"
        );
    }

    #[test]
    fn bindings_are_reflected_from_declarations() {
        let source = "@group(0) @binding(0) var<uniform> constants: Constants;\n\
                      @group(2) @binding(3) var shadows: texture_depth_2d_array;\n\
                      @group(2) @binding(4) var sky: texture_cube<f32>;\n\
                      @group(3) @binding(1) var compare: sampler_comparison;";
        let bindings = reflect_bindings(source).unwrap();
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings[0].kind, BindingKind::Uniform);
        assert_eq!(
            bindings[1].kind,
            BindingKind::Texture {
                dimension: ViewDimension::D2Array,
                depth: true
            }
        );
        assert_eq!(bindings[2].binding, 4);
        assert_eq!(bindings[3].kind, BindingKind::Sampler { comparison: true });
    }

    fn check_variant(library: &ShaderLibrary, material: &dyn Material, blend_mode: RenderPassBlendMode) {
        let layout = crate::renderer::primitives::cube(glam::Vec3::ONE).layout().clone();
        let flags = material
            .config_flags(&RendererFeatures::default(), blend_mode, &layout)
            .unwrap();
        for settings in [
            material.vertex_shader_settings(&flags),
            material.pixel_shader_settings(&flags),
        ] {
            let source = library.preprocess(&settings).unwrap();
            let bindings = reflect_bindings(&source).unwrap();
            let mut seen = BTreeSet::new();
            for binding in bindings {
                assert!(seen.insert((binding.group, binding.binding)), "{}", settings.filename);
            }
        }
    }

    #[test]
    fn builtin_materials_preprocess_cleanly() {
        let library = ShaderLibrary::builtin();
        let mut textured = PbrMaterial::default();
        for slot in PbrTexture::ALL {
            textured.set_texture(slot, Some(Arc::new(Texture::solid_color("map", [255; 4]))));
        }

        for blend_mode in [RenderPassBlendMode::Opaque, RenderPassBlendMode::BlendedAlpha] {
            check_variant(&library, &PbrMaterial::default(), blend_mode);
            check_variant(&library, &textured, blend_mode);
            check_variant(&library, &UnlitMaterial::default(), blend_mode);
        }
        check_variant(&library, &ClearGBufferMaterial, RenderPassBlendMode::Opaque);
        check_variant(&library, &DeferredLightMaterial::new(), RenderPassBlendMode::Additive);
        check_variant(&library, &SkyboxMaterial::default(), RenderPassBlendMode::Opaque);
    }

    #[test]
    fn texture_slots_match_the_material_resources() {
        let library = ShaderLibrary::builtin();
        let mut material = PbrMaterial::default();
        material.set_texture(PbrTexture::BaseColor, Some(Arc::new(Texture::solid_color("a", [255; 4]))));
        material.set_texture(PbrTexture::Emissive, Some(Arc::new(Texture::solid_color("e", [0; 4]))));
        let layout = MeshVertexLayout::from_elements(Vec::new());
        let flags = material
            .config_flags(&RendererFeatures::default(), RenderPassBlendMode::Opaque, &layout)
            .unwrap();
        let resources = material.shader_resources(&flags, &RenderLightData::new()).unwrap();

        let source = library.preprocess(&material.pixel_shader_settings(&flags)).unwrap();
        let bindings = reflect_bindings(&source).unwrap();
        let textures = bindings.iter().filter(|binding| binding.group == 2).count();
        let samplers = bindings.iter().filter(|binding| binding.group == 3).count();
        assert_eq!(textures, resources.textures.len());
        assert_eq!(samplers, resources.samplers.len());
    }
}
