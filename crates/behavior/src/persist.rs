//! # Save / Resume Streams
//!
//! Little-endian stream primitives and the stage records built on them.
//! Brain records are written by the brains themselves using these helpers.
//!
//! ## Stage Records
//! ```text
//! template: name(u16 len + utf8) notify(u8) forward(u32) back(u32)
//!           advance(u32) regress(u32) loops(i32, -1 = infinite)
//!           do_advance_to(bool) advance_to(i32) do_regress_to(bool) regress_to(i32)
//! aux:      local_time(f32) length(f32) cur_loop(i32) attached(bool)
//! ```

use std::io::{self, Read, Write};

use crate::error::{BehaviorError, BehaviorResult};
use crate::keys::ObjectKey;
use crate::stage::{AdvancePolicy, AnimStage, BackPolicy, ForwardPolicy, LoopCount, NotifyFlags, RegressPolicy};

// ============================================================================
// Primitives
// ============================================================================

fn read_array<R: Read, const N: usize>(reader: &mut R, what: &'static str) -> BehaviorResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => BehaviorError::UnexpectedEof(what),
        _ => BehaviorError::Io(e),
    })?;
    Ok(buf)
}

pub fn write_u8<W: Write>(writer: &mut W, value: u8) -> BehaviorResult<()> {
    writer.write_all(&[value])?;
    Ok(())
}

pub fn read_u8<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<u8> {
    Ok(read_array::<_, 1>(reader, what)?[0])
}

pub fn write_bool<W: Write>(writer: &mut W, value: bool) -> BehaviorResult<()> {
    write_u8(writer, value as u8)
}

pub fn read_bool<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<bool> {
    Ok(read_u8(reader, what)? != 0)
}

pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> BehaviorResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_u32<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<u32> {
    Ok(u32::from_le_bytes(read_array(reader, what)?))
}

pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> BehaviorResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<i32> {
    Ok(i32::from_le_bytes(read_array(reader, what)?))
}

pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> BehaviorResult<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_f32<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<f32> {
    Ok(f32::from_le_bytes(read_array(reader, what)?))
}

/// Write a string as u16 length + UTF-8 bytes. Longer strings are truncated
/// at a character boundary.
pub fn write_string<W: Write>(writer: &mut W, value: &str) -> BehaviorResult<()> {
    let mut end = value.len().min(u16::MAX as usize);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    writer.write_all(&(end as u16).to_le_bytes())?;
    writer.write_all(&value.as_bytes()[..end])?;
    Ok(())
}

pub fn read_string<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<String> {
    let len = u16::from_le_bytes(read_array(reader, what)?) as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => BehaviorError::UnexpectedEof(what),
        _ => BehaviorError::Io(e),
    })?;
    String::from_utf8(bytes).map_err(|_| BehaviorError::InvalidString)
}

/// Optional key as presence flag + name.
pub fn write_key<W: Write>(writer: &mut W, key: Option<&ObjectKey>) -> BehaviorResult<()> {
    match key {
        Some(key) => {
            write_bool(writer, true)?;
            write_string(writer, key.name())
        }
        None => write_bool(writer, false),
    }
}

pub fn read_key<R: Read>(reader: &mut R, what: &'static str) -> BehaviorResult<Option<ObjectKey>> {
    if read_bool(reader, what)? {
        Ok(Some(ObjectKey(read_string(reader, what)?)))
    } else {
        Ok(None)
    }
}

fn invalid(field: &'static str, value: u32) -> BehaviorError {
    BehaviorError::InvalidTag { field, value }
}

// ============================================================================
// Stage Records
// ============================================================================

/// Write the template (configuration) part of a stage.
pub fn write_stage_template<W: Write>(writer: &mut W, stage: &AnimStage) -> BehaviorResult<()> {
    write_string(writer, stage.anim_name())?;
    write_u8(writer, stage.notify_flags().bits())?;
    write_u32(writer, stage.forward_policy() as u32)?;
    write_u32(writer, stage.back_policy() as u32)?;
    write_u32(writer, stage.advance_policy() as u32)?;
    write_u32(writer, stage.regress_policy() as u32)?;
    write_i32(writer, stage.loops().to_wire())?;

    write_bool(writer, stage.advance_to().is_some())?;
    write_i32(writer, stage.advance_to().unwrap_or(0))?;
    write_bool(writer, stage.regress_to().is_some())?;
    write_i32(writer, stage.regress_to().unwrap_or(0))?;
    Ok(())
}

/// Read a stage template. The stage comes back unbound with fresh runtime state.
pub fn read_stage_template<R: Read>(reader: &mut R) -> BehaviorResult<AnimStage> {
    let name = read_string(reader, "stage name")?;
    let notify = NotifyFlags::from_bits_truncate(read_u8(reader, "stage notify")?);

    let forward = read_u32(reader, "stage forward")?;
    let forward = ForwardPolicy::from_u32(forward).ok_or_else(|| invalid("stage forward", forward))?;
    let back = read_u32(reader, "stage back")?;
    let back = BackPolicy::from_u32(back).ok_or_else(|| invalid("stage back", back))?;
    let advance = read_u32(reader, "stage advance")?;
    let advance = AdvancePolicy::from_u32(advance).ok_or_else(|| invalid("stage advance", advance))?;
    let regress = read_u32(reader, "stage regress")?;
    let regress = RegressPolicy::from_u32(regress).ok_or_else(|| invalid("stage regress", regress))?;
    let loops = LoopCount::from_wire(read_i32(reader, "stage loops")?);

    let do_advance_to = read_bool(reader, "stage advance-to")?;
    let advance_to = read_i32(reader, "stage advance-to")?;
    let do_regress_to = read_bool(reader, "stage regress-to")?;
    let regress_to = read_i32(reader, "stage regress-to")?;

    Ok(AnimStage::new(name)
        .with_notify(notify)
        .with_forward(forward)
        .with_back(back)
        .with_advance(advance)
        .with_regress(regress)
        .with_loops(loops)
        .with_advance_to(do_advance_to.then_some(advance_to))
        .with_regress_to(do_regress_to.then_some(regress_to)))
}

/// Write the runtime part of a stage.
pub fn save_stage_aux<W: Write>(writer: &mut W, stage: &AnimStage) -> BehaviorResult<()> {
    write_f32(writer, stage.local_time())?;
    write_f32(writer, stage.length())?;
    write_i32(writer, stage.current_loop().min(i32::MAX as u32) as i32)?;
    write_bool(writer, stage.is_attached() || stage.was_attached())?;
    Ok(())
}

/// Restore the runtime part of a stage written by [`save_stage_aux`]. The
/// stage comes back unbound; its brain re-attaches it.
pub fn load_stage_aux<R: Read>(reader: &mut R, stage: &mut AnimStage) -> BehaviorResult<()> {
    let local_time = read_f32(reader, "stage local time")?;
    let length = read_f32(reader, "stage length")?;
    let cur_loop = read_i32(reader, "stage current loop")?;
    let attached = read_bool(reader, "stage attached")?;
    stage.restore_runtime(local_time, length, cur_loop.max(0) as u32, attached);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AnimationLibrary, AvatarRig};
    use crate::stage::NotifyRelay;
    use std::io::Cursor;

    #[test]
    fn test_primitives() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 7).unwrap();
        write_i32(&mut buf, -1).unwrap();
        write_f32(&mut buf, 1.25).unwrap();
        write_bool(&mut buf, true).unwrap();
        write_string(&mut buf, "SitIdle").unwrap();
        assert_eq!(&buf[..4], &[7, 0, 0, 0]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_u32(&mut cursor, "a").unwrap(), 7);
        assert_eq!(read_i32(&mut cursor, "b").unwrap(), -1);
        assert_eq!(read_f32(&mut cursor, "c").unwrap(), 1.25);
        assert!(read_bool(&mut cursor, "d").unwrap());
        assert_eq!(read_string(&mut cursor, "e").unwrap(), "SitIdle");
    }

    #[test]
    fn test_truncated_stream() {
        let mut cursor = Cursor::new(vec![1u8, 2]);
        let err = read_u32(&mut cursor, "stage count").unwrap_err();
        assert!(matches!(err, BehaviorError::UnexpectedEof("stage count")));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_template_round_trip() {
        let stage = AnimStage::new("LadderUp")
            .with_notify(NotifyFlags::ENTER | NotifyFlags::REGRESS)
            .with_forward(ForwardPolicy::Key)
            .with_back(BackPolicy::Key)
            .with_advance(AdvancePolicy::OnAnyKey)
            .with_regress(RegressPolicy::Auto)
            .with_loops(LoopCount::Infinite)
            .with_advance_to(Some(-1))
            .with_regress_to(None);

        let mut buf = Vec::new();
        write_stage_template(&mut buf, &stage).unwrap();
        let read = read_stage_template(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, stage);
    }

    #[test]
    fn test_bad_policy_tag() {
        let mut buf = Vec::new();
        write_string(&mut buf, "Bow").unwrap();
        write_u8(&mut buf, 0).unwrap();
        write_u32(&mut buf, 9).unwrap();
        let err = read_stage_template(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, BehaviorError::InvalidTag { field: "stage forward", value: 9 }));
    }

    #[test]
    fn test_aux_round_trip_is_byte_identical() {
        let library = AnimationLibrary::default().with(AnimationClip::new("Bow", 2.0));
        let mut rig = AvatarRig::new("avatar", library);
        let mut stage = AnimStage::auto("Bow", NotifyFlags::empty()).with_loops(LoopCount::Finite(3));
        stage.attach(&mut rig, NotifyRelay::default(), 1.0);
        stage.move_relative(2.75, &mut rig);

        let mut first = Vec::new();
        save_stage_aux(&mut first, &stage).unwrap();

        let mut restored = stage.clone_template();
        load_stage_aux(&mut Cursor::new(first.clone()), &mut restored).unwrap();
        assert_eq!(restored.local_time(), stage.local_time());
        assert_eq!(restored.length(), 2.0);
        assert_eq!(restored.current_loop(), 1);
        assert!(restored.was_attached());

        let mut second = Vec::new();
        save_stage_aux(&mut second, &restored).unwrap();
        assert_eq!(first, second);
        stage.detach(&mut rig);
    }

    #[test]
    fn test_restored_stage_is_unbound_until_attached() {
        let library = AnimationLibrary::default().with(AnimationClip::new("Bow", 2.0));
        let mut rig = AvatarRig::new("avatar", library);
        let mut stage = AnimStage::auto("Bow", NotifyFlags::empty());
        stage.attach(&mut rig, NotifyRelay::default(), 1.0);
        stage.move_relative(0.5, &mut rig);
        let mut buf = Vec::new();
        save_stage_aux(&mut buf, &stage).unwrap();
        stage.detach(&mut rig);

        let mut restored = stage.clone_template();
        load_stage_aux(&mut Cursor::new(buf), &mut restored).unwrap();
        assert!(!restored.is_attached());
        assert!(!restored.is_bound());
        assert!(restored.instance().is_none());
        assert_eq!(rig.attached_count(), 0);

        // Attaching binds a live instance at the restored time
        let id = restored.attach(&mut rig, NotifyRelay::default(), 1.0).unwrap();
        assert!(restored.is_attached());
        assert!(!restored.was_attached());
        assert_eq!(rig.attached_count(), 1);
        assert_eq!(rig.instance(id).map(|i| i.time), Some(0.5));
        assert!(restored.detach(&mut rig));
    }
}
