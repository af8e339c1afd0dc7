// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Executes recorded commands against the device state.

use super::command::{Command, DescriptorRef, DescriptorSet, HeapEntry, PassTarget, SampledBinding, UniformBinding};
use super::gpu::GpuState;
use super::image::{quantize, Texel};
use super::programs::{run_fragment, run_vertex, BoundTexture};
use super::raster::{rasterize, ClipVertex, Surface, Viewport};
use super::store::{BufferKey, PipelineKey, TextureKey};
use quadra_core::renderer::api::{
    CapturedFrame, RasterState, ShaderId, UniformPayload, Vertex,
};
use quadra_core::renderer::ValidationError;

/// Bindings of the executing queue. They persist across submissions, which is what
/// lets an immediate backend run one draw at a time.
#[derive(Debug, Default)]
pub struct ExecState {
    pass: Option<PassTarget>,
    viewport: Option<Viewport>,
    raster: Option<(RasterState, Option<PipelineKey>)>,
    vertex: Option<BufferKey>,
    index: Option<BufferKey>,
    descriptors: Option<DescriptorRef>,
}

/// Runs `commands` in order. Problems found while executing are appended to the
/// device's validation log.
pub fn execute(gpu: &mut GpuState, commands: &[Command]) {
    let mut exec = std::mem::take(&mut gpu.machine);
    run(gpu, &mut exec, commands);
    gpu.machine = exec;
}

fn run(gpu: &mut GpuState, exec: &mut ExecState, commands: &[Command]) {

    for command in commands {
        match command {
            Command::BeginPass(target) => {
                clear_attachments(gpu, target);
                exec.pass = Some(*target);
            }
            Command::EndPass => exec.pass = None,
            Command::SetViewport(viewport) => exec.viewport = Some(*viewport),
            Command::SetRasterState { state, pipeline } => exec.raster = Some((*state, *pipeline)),
            Command::BindVertexBuffer(buffer) => exec.vertex = Some(*buffer),
            Command::BindIndexBuffer(buffer) => exec.index = Some(*buffer),
            Command::BindDescriptors(descriptors) => exec.descriptors = Some(descriptors.clone()),
            Command::DrawIndexed {
                program,
                index_count,
            } => draw(gpu, exec, *program, *index_count),
            Command::CopyBuffer { src, dst, size } => {
                let Some(data) = gpu.buffers.get(*src).map(|b| {
                    let n = (*size as usize).min(b.data.len());
                    b.data[..n].to_vec()
                }) else {
                    continue;
                };
                if let Some(dst) = gpu.buffers.get_mut(*dst) {
                    let n = data.len().min(dst.data.len());
                    dst.data[..n].copy_from_slice(&data[..n]);
                }
            }
            Command::CopyBufferToTexture { src, dst } => {
                let (Some(buffer), Some(image)) = (gpu.buffers.get(*src), gpu.textures.get_mut(*dst))
                else {
                    continue;
                };
                image.upload_rgba8(&buffer.data);
            }
            Command::BlitMip {
                texture,
                layer,
                src_mip,
            } => {
                if let Some(image) = gpu.textures.get_mut(*texture) {
                    image.downsample(*layer, *src_mip);
                }
            }
            Command::Present { image } => {
                if let Some(image) = gpu.textures.get(*image) {
                    gpu.last_present = Some(CapturedFrame {
                        width: image.width,
                        height: image.height,
                        rgba: image.read_rgba8(0, 0),
                    });
                }
            }
        }
    }
}

fn clear_attachments(gpu: &mut GpuState, target: &PassTarget) {
    if let (Some(att), Some(c)) = (target.color, target.clear_color) {
        if let Some(image) = gpu.textures.get_mut(att.texture) {
            if image.contains(att.layer, 0) {
                let texel = c.map(quantize);
                image.level_mut(att.layer, 0).fill(texel);
            }
        }
    }
    if let (Some(att), Some(d)) = (target.depth, target.clear_depth) {
        if let Some(image) = gpu.textures.get_mut(att.texture) {
            if image.contains(att.layer, 0) {
                image.level_mut(att.layer, 0).fill([d, 0.0, 0.0, 0.0]);
            }
        }
    }
}

/// Looks the descriptors of a draw up, checking that nothing they point at was
/// recycled since recording.
fn resolve(gpu: &GpuState, descriptors: &DescriptorRef) -> Result<DescriptorSet, ValidationError> {
    match descriptors {
        DescriptorRef::Direct(set) => Ok(set.clone()),
        DescriptorRef::PoolSet {
            pool,
            index,
            generation,
            slot,
        } => gpu
            .pools
            .get(*pool)
            .filter(|p| p.generation == *generation)
            .and_then(|p| p.sets.get(*index as usize))
            .cloned()
            .ok_or(ValidationError::DescriptorReleased { slot: *slot }),
        DescriptorRef::HeapRegion {
            heap,
            offset,
            len,
            generation,
            slot,
        } => {
            let released = ValidationError::DescriptorReleased { slot: *slot };
            let heap = gpu.heaps.get(*heap).ok_or(released.clone())?;
            if heap.region_generation(*slot) != Some(*generation) || *len == 0 {
                return Err(released);
            }
            let Some(HeapEntry::Uniform(uniform)) = heap.get(*offset) else {
                return Err(released);
            };
            let mut textures = Vec::with_capacity(*len as usize - 1);
            for i in 1..*len {
                match heap.get(offset + i) {
                    Some(HeapEntry::Sampled(binding)) => textures.push(binding),
                    _ => return Err(released),
                }
            }
            Ok(DescriptorSet { uniform, textures })
        }
        DescriptorRef::Persistent {
            heap,
            uniform,
            copy,
            textures,
        } => {
            let released = ValidationError::DescriptorReleased { slot: *copy };
            let heap = gpu.heaps.get(*heap).ok_or(released.clone())?;
            let Some(HeapEntry::UniformBuffer(buffer)) = heap.get(*uniform) else {
                return Err(released);
            };
            let mut bound = Vec::with_capacity(textures.len());
            for &(slot, texture, sampler) in textures {
                match (heap.get(texture), heap.get(sampler)) {
                    (Some(HeapEntry::Texture(texture)), Some(HeapEntry::Sampler(sampler))) => {
                        bound.push(SampledBinding {
                            slot,
                            texture,
                            sampler,
                        })
                    }
                    _ => return Err(released),
                }
            }
            Ok(DescriptorSet {
                uniform: UniformBinding {
                    buffer,
                    copy: *copy,
                },
                textures: bound,
            })
        }
    }
}

fn draw(gpu: &mut GpuState, exec: &ExecState, program: ShaderId, index_count: u32) {
    let Some(pass) = exec.pass else {
        gpu.validation.push(ValidationError::DrawOutsidePass);
        return;
    };
    let (Some(vertex), Some(index), Some(descriptors)) = (exec.vertex, exec.index, &exec.descriptors)
    else {
        log::warn!("Draw of '{program}' skipped: incomplete bindings");
        return;
    };
    let set = match resolve(gpu, descriptors) {
        Ok(set) => set,
        Err(err) => {
            gpu.validation.push(err);
            return;
        }
    };
    let state = match exec.raster {
        Some((_, Some(pipeline))) => match gpu.pipelines.get(pipeline) {
            Some(p) => p.state,
            None => {
                log::warn!("Draw of '{program}' skipped: pipeline was destroyed");
                return;
            }
        },
        Some((state, None)) => state,
        None => RasterState::for_shader(program),
    };

    let payload = {
        let Some(buffer) = gpu.buffers.get(set.uniform.buffer) else {
            log::warn!("Draw of '{program}' skipped: uniform buffer was destroyed");
            return;
        };
        let range = buffer.copy_range(set.uniform.copy);
        let bytes = buffer.data.get(range).unwrap_or_default();
        match UniformPayload::from_bytes(program, bytes) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("Draw of '{program}' skipped: {err}");
                return;
            }
        }
    };

    let (vertices, indices) = match (gpu.buffers.get(vertex), gpu.buffers.get(index)) {
        (Some(v), Some(i)) => (
            bytemuck::pod_collect_to_vec::<u8, Vertex>(
                &v.data[..v.data.len() - v.data.len() % std::mem::size_of::<Vertex>()],
            ),
            bytemuck::pod_collect_to_vec::<u8, u32>(&i.data[..i.data.len() - i.data.len() % 4]),
        ),
        _ => {
            log::warn!("Draw of '{program}' skipped: geometry buffer was destroyed");
            return;
        }
    };
    let clip: Vec<ClipVertex> = vertices.iter().map(|v| run_vertex(&payload, v)).collect();
    let count = (index_count as usize).min(indices.len());
    let triangles: Vec<[ClipVertex; 3]> = indices[..count - count % 3]
        .chunks_exact(3)
        .filter_map(|t| {
            Some([
                *clip.get(t[0] as usize)?,
                *clip.get(t[1] as usize)?,
                *clip.get(t[2] as usize)?,
            ])
        })
        .collect();
    if triangles.is_empty() {
        return;
    }

    let env = gpu.env();
    let mut color_level = take_attachment(gpu, pass.color.map(|a| (a.texture, a.layer)));
    let mut depth_level = take_attachment(gpu, pass.depth.map(|a| (a.texture, a.layer)));
    let extent = pass
        .color
        .or(pass.depth)
        .and_then(|a| gpu.textures.get(a.texture))
        .map(|image| (image.width, image.height));

    if let Some((width, height)) = extent {
        let max_slot = set.textures.iter().map(|b| b.slot as usize + 1).max().unwrap_or(0);
        let mut slots: Vec<Option<BoundTexture<'_>>> = vec![None; max_slot];
        for binding in &set.textures {
            if let (Some(image), Some(sampler)) = (
                gpu.textures.get(binding.texture),
                gpu.samplers.get(binding.sampler),
            ) {
                slots[binding.slot as usize] = Some(BoundTexture {
                    image,
                    sampler: &sampler.descriptor,
                });
            }
        }

        let viewport = exec
            .viewport
            .unwrap_or_else(|| Viewport::full(width, height, !env.bottom_left));
        let mut surface = Surface {
            width,
            height,
            color: color_level.as_deref_mut(),
            depth: depth_level.as_deref_mut(),
        };
        let written = rasterize(
            &mut surface,
            &viewport,
            &state,
            env.depth_range,
            &triangles,
            &mut |fragment| run_fragment(&payload, fragment, &slots, &env),
        );
        log::trace!("Draw of '{program}': {} triangles, {written} fragments", triangles.len());
    }

    restore_attachment(gpu, pass.color.map(|a| (a.texture, a.layer)), color_level);
    restore_attachment(gpu, pass.depth.map(|a| (a.texture, a.layer)), depth_level);
}

fn take_attachment(
    gpu: &mut GpuState,
    attachment: Option<(TextureKey, u32)>,
) -> Option<Vec<Texel>> {
    let (texture, layer) = attachment?;
    let image = gpu.textures.get_mut(texture)?;
    image.contains(layer, 0).then(|| image.take_level(layer, 0))
}

fn restore_attachment(
    gpu: &mut GpuState,
    attachment: Option<(TextureKey, u32)>,
    level: Option<Vec<Texel>>,
) {
    if let (Some((texture, layer)), Some(level)) = (attachment, level) {
        if let Some(image) = gpu.textures.get_mut(texture) {
            image.restore_level(layer, 0, level);
        }
    }
}
