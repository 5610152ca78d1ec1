use std::borrow::Cow;
use std::fmt;

use bytemuck::{Pod, Zeroable};
use wgpu::naga;

use crate::error::ShaderError;

/// Pipeline stage a GLSL source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub(crate) fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Vertex layout shared by [`VERTEX_SHADER`] and every backend.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

const fn vertex(x: f32, y: f32, u: f32, v: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y],
        tex_coord: [u, v],
    }
}

/// Two triangles covering clip space. Texture coordinates run from (0, 0)
/// at the top-left corner to (1, 1) at the bottom-right.
pub const FULLSCREEN_QUAD: [QuadVertex; 6] = [
    vertex(-1.0, 1.0, 0.0, 0.0),
    vertex(-1.0, -1.0, 0.0, 1.0),
    vertex(1.0, 1.0, 1.0, 0.0),
    vertex(1.0, 1.0, 1.0, 0.0),
    vertex(-1.0, -1.0, 0.0, 1.0),
    vertex(1.0, -1.0, 1.0, 1.0),
];

/// Pass-through vertex stage: forwards the quad position and texture
/// coordinate.
pub const VERTEX_SHADER: &str = r"#version 450
layout(location = 0) in vec2 position;
layout(location = 1) in vec2 tex_coord;

layout(location = 0) out vec2 v_tex_coord;

void main() {
    v_tex_coord = tex_coord;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Per-pixel color adjustment. Mirrors [`crate::color::apply_pipeline`]
/// operator for operator; the block layout must match `FilterUniforms`.
pub const FRAGMENT_SHADER: &str = r"#version 450
layout(location = 0) in vec2 v_tex_coord;
layout(location = 0) out vec4 out_color;

layout(std140, set = 0, binding = 0) uniform FilterParams {
    float saturation;
    float brightness;
    float contrast;
    float hue;
    float exposure;
} params;

layout(set = 1, binding = 0) uniform texture2D source_texture;
layout(set = 1, binding = 1) uniform sampler source_sampler;

const float TAU = 6.28318530718;
const vec3 LUMA = vec3(0.299, 0.587, 0.114);

float saturation_denominator(float max_c, float min_c) {
    if ((max_c + min_c) / 2.0 > 0.5) {
        return 2.0 - max_c - min_c;
    }
    return max_c + min_c;
}

bool is_hsl_singular(vec3 c) {
    float max_c = max(max(c.r, c.g), c.b);
    float min_c = min(min(c.r, c.g), c.b);
    return max_c != min_c && saturation_denominator(max_c, min_c) == 0.0;
}

vec3 rgb_to_hsl(vec3 c) {
    float max_c = max(max(c.r, c.g), c.b);
    float min_c = min(min(c.r, c.g), c.b);
    float l = (max_c + min_c) / 2.0;
    if (max_c == min_c) {
        return vec3(0.0, 0.0, l);
    }

    float d = max_c - min_c;
    float s = d / saturation_denominator(max_c, min_c);

    float h = 0.0;
    if (max_c == c.r) {
        h = (c.g - c.b) / d;
        if (c.g < c.b) {
            h = h + 6.0;
        }
    } else if (max_c == c.g) {
        h = (c.b - c.r) / d + 2.0;
    } else {
        h = (c.r - c.g) / d + 4.0;
    }
    return vec3(h / 6.0, s, l);
}

float hue_to_rgb(float p, float q, float t_in) {
    float t = t_in;
    if (t < 0.0) {
        t = t + 1.0;
    }
    if (t > 1.0) {
        t = t - 1.0;
    }
    if (t < 1.0 / 6.0) {
        return p + (q - p) * 6.0 * t;
    }
    if (t < 1.0 / 2.0) {
        return q;
    }
    if (t < 2.0 / 3.0) {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    return p;
}

vec3 hsl_to_rgb(vec3 hsl) {
    if (hsl.y == 0.0) {
        return vec3(hsl.z);
    }
    float q = 0.0;
    if (hsl.z < 0.5) {
        q = hsl.z * (1.0 + hsl.y);
    } else {
        q = hsl.z + hsl.y - hsl.z * hsl.y;
    }
    float p = 2.0 * hsl.z - q;
    return vec3(
        hue_to_rgb(p, q, hsl.x + 1.0 / 3.0),
        hue_to_rgb(p, q, hsl.x),
        hue_to_rgb(p, q, hsl.x - 1.0 / 3.0)
    );
}

vec3 apply_saturation(vec3 c, float amount) {
    float gray = dot(c, LUMA);
    return vec3(gray) + (c - vec3(gray)) * amount;
}

vec3 apply_contrast(vec3 c, float amount) {
    return (c - vec3(0.5)) * amount + vec3(0.5);
}

vec3 apply_hue(vec3 c, float shift) {
    float turns = fract(shift / TAU);
    if (turns == 0.0 || is_hsl_singular(c)) {
        return c;
    }
    vec3 hsl = rgb_to_hsl(c);
    hsl.x = fract(hsl.x + turns);
    return hsl_to_rgb(hsl);
}

void main() {
    vec4 texel = texture(sampler2D(source_texture, source_sampler), v_tex_coord);
    vec3 color = texel.rgb;
    color = apply_saturation(color, params.saturation);
    color = color * params.brightness;
    color = apply_contrast(color, params.contrast);
    color = apply_hue(color, params.hue);
    color = color * exp2(params.exposure);
    out_color = vec4(clamp(color, vec3(0.0), vec3(1.0)), texel.a);
}
";

/// GLSL source for one two-stage program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl Default for ProgramSource {
    fn default() -> Self {
        Self::color_adjust()
    }
}

impl ProgramSource {
    /// The built-in color-adjustment program.
    pub fn color_adjust() -> Self {
        Self {
            vertex: Cow::Borrowed(VERTEX_SHADER),
            fragment: Cow::Borrowed(FRAGMENT_SHADER),
        }
    }

    pub fn new(
        vertex: impl Into<Cow<'static, str>>,
        fragment: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }

    pub fn stage(&self, stage: ShaderStage) -> &str {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

/// Parses and validates one stage with naga, returning the IR module.
pub(crate) fn compile_stage(stage: ShaderStage, source: &str) -> Result<naga::Module, ShaderError> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(stage.to_naga());
    let module = frontend
        .parse(&options, source)
        .map_err(|err| ShaderError::Compile {
            stage,
            message: err.emit_to_string(source),
        })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|err| ShaderError::Compile {
            stage,
            message: err.emit_to_string(source),
        })?;

    Ok(module)
}

/// Compiles both stages and checks that every fragment input location is
/// written by the vertex stage.
pub fn validate_program(source: &ProgramSource) -> Result<(), ShaderError> {
    let vertex = compile_stage(ShaderStage::Vertex, &source.vertex)?;
    let fragment = compile_stage(ShaderStage::Fragment, &source.fragment)?;

    let outputs = stage_locations(&vertex, naga::ShaderStage::Vertex, Interface::Output)?;
    let inputs = stage_locations(&fragment, naga::ShaderStage::Fragment, Interface::Input)?;
    if let Some(missing) = inputs.iter().find(|location| !outputs.contains(location)) {
        return Err(ShaderError::Link(format!(
            "fragment input at location {missing} is not written by the vertex stage"
        )));
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Interface {
    Input,
    Output,
}

fn stage_locations(
    module: &naga::Module,
    stage: naga::ShaderStage,
    interface: Interface,
) -> Result<Vec<u32>, ShaderError> {
    let entry = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == stage)
        .ok_or_else(|| ShaderError::Link(format!("no {stage:?} entry point")))?;

    let mut locations = Vec::new();
    match interface {
        Interface::Input => {
            for argument in &entry.function.arguments {
                collect_locations(module, argument.binding.as_ref(), argument.ty, &mut locations);
            }
        }
        Interface::Output => {
            if let Some(result) = &entry.function.result {
                collect_locations(module, result.binding.as_ref(), result.ty, &mut locations);
            }
        }
    }
    Ok(locations)
}

fn collect_locations(
    module: &naga::Module,
    binding: Option<&naga::Binding>,
    ty: naga::Handle<naga::Type>,
    out: &mut Vec<u32>,
) {
    match binding {
        Some(naga::Binding::Location { location, .. }) => out.push(*location),
        Some(naga::Binding::BuiltIn(_)) => {}
        None => {
            if let naga::TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    if let Some(naga::Binding::Location { location, .. }) = &member.binding {
                        out.push(*location);
                    }
                }
            }
        }
    }
}
