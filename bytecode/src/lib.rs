mod op;
mod instruction;
mod builder;
mod decoder;
mod line_map;

pub use op::Op;
pub use instruction::Instruction;
pub use builder::{BytecodeBuilder, JumpTooFar, Label};
pub use decoder::{decode_at, BytecodeDecoder, DecodeError};
pub use line_map::{line_map_lookup, LineMapBuilder};

/// Marks an RK operand as a constant pool index.
pub const RK_CONSTANT: u16 = 0x8000;

/// Largest constant pool index an RK operand can address.
pub const RK_MAX_CONSTANT: u16 = RK_CONSTANT - 1;

/// Whether an RK operand refers to the constant pool.
#[inline(always)]
pub const fn rk_constant(rk: u16) -> bool {
    rk & RK_CONSTANT != 0
}

/// The register or constant index carried by an RK operand.
#[inline(always)]
pub const fn rk_index(rk: u16) -> u16 {
    rk & !RK_CONSTANT
}

/// Encode a constant pool index as an RK operand.
#[inline(always)]
pub const fn rk_from_constant(idx: u16) -> u16 {
    idx | RK_CONSTANT
}

/// Throw reasons carried by `Throw`.
pub mod throw {
    pub const EXCEPTION: u8 = 1;
    pub const RETURN: u8 = 2;
    pub const BREAK: u8 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .map(|r| r.expect("decode").1)
            .collect()
    }

    #[test]
    fn registers_and_literals() {
        let mut b = BytecodeBuilder::new();
        b.mov(1, 2);
        b.load_constant(3, 40);
        b.string(4, 1);
        b.load_self(0);
        b.nil(5);
        b.bool(6, true);
        b.new_array(7, 3);
        b.new_hash(8, 2);
        b.new_range(9, 10, true);
        b.return_(9);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Move { dst: 1, src: 2 },
            Instruction::LoadK { dst: 3, idx: 40 },
            Instruction::String { dst: 4, idx: 1 },
            Instruction::LoadSelf { dst: 0 },
            Instruction::Nil { dst: 5 },
            Instruction::Bool { dst: 6, value: true },
            Instruction::NewArray { dst: 7, count: 3 },
            Instruction::NewHash { dst: 8, pairs: 2 },
            Instruction::NewRange { dst: 9, end: 10, exclusive: true },
            Instruction::Return { src: 9 },
        ]);
    }

    #[test]
    fn dispatch_sequence() {
        let mut b = BytecodeBuilder::new();
        b.cached_lookup(3, 7, 0);
        b.call(3, 2, true, Some(1));
        b.call(3, 0, false, None);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Cache { recv: 3, skip: 6, cache: 0 },
            Instruction::Lookup { recv: 3, message: 7, cache: 0 },
            Instruction::Call { recv: 3, argc: 2, splat: true, block: 2 },
            Instruction::Call { recv: 3, argc: 0, splat: false, block: 0 },
        ]);
    }

    #[test]
    fn cache_skip_covers_lookup() {
        for recv in [0u16, 200, 300, 4000] {
            let mut b = BytecodeBuilder::new();
            b.cached_lookup(recv, 1, 2);
            let bytes = b.into_bytes();
            let (cache, after_cache) = decode_at(&bytes, 0).expect("cache");
            let Instruction::Cache { skip, .. } = cache else {
                panic!("expected Cache, got {cache}");
            };
            assert_eq!(after_cache + skip as usize, bytes.len());
        }
    }

    #[test]
    fn wide_registers() {
        let mut b = BytecodeBuilder::new();
        b.mov(300, 5);
        b.get_ivar(1000, 2);
        b.cached_lookup(256, 1, 9);
        b.meta_def(0, 1, 400);

        let bytes = b.into_bytes();
        assert_eq!(bytes[0], Op::Wide as u8);
        assert_eq!(decode_all(&bytes), vec![
            Instruction::Move { dst: 300, src: 5 },
            Instruction::GetIvar { dst: 1000, name: 2 },
            Instruction::Cache { recv: 256, skip: 8, cache: 9 },
            Instruction::Lookup { recv: 256, message: 1, cache: 9 },
            Instruction::MetaDef { block: 0, name: 1, receiver: 400 },
        ]);
    }

    #[test]
    fn forward_jumps() {
        let mut b = BytecodeBuilder::new();
        let skip = b.jump_unless(2);
        b.nil(0);
        let out = b.jump();
        b.bind(skip).unwrap();
        b.bool(0, false);
        b.bind(out).unwrap();
        b.return_(0);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::JumpUnless { src: 2, offset: 5 },
            Instruction::Nil { dst: 0 },
            Instruction::Jump { offset: 3 },
            Instruction::Bool { dst: 0, value: false },
            Instruction::Return { src: 0 },
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let top = b.current_offset();
        b.nil(1);
        b.jump_back(top).unwrap();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Nil { dst: 1 },
            Instruction::Jump { offset: -5 },
        ]);
    }

    #[test]
    fn out_of_range_jumps_are_rejected() {
        let mut b = BytecodeBuilder::new();
        let skip = b.jump_unless(1);
        for _ in 0..20_000 {
            b.nil(0);
        }
        assert_eq!(b.bind(skip), Err(JumpTooFar { from: 4, to: 40_004 }));

        let mut b = BytecodeBuilder::new();
        for _ in 0..20_000 {
            b.nil(0);
        }
        let len = b.current_offset();
        assert_eq!(b.jump_back(0), Err(JumpTooFar { from: len + 3, to: 0 }));
        // Nothing is emitted for a rejected jump.
        assert_eq!(b.current_offset(), len);
    }

    #[test]
    fn rk_operands() {
        let k = rk_from_constant(12);
        assert!(rk_constant(k));
        assert!(!rk_constant(12));
        assert_eq!(rk_index(k), 12);

        let mut b = BytecodeBuilder::new();
        b.add(1, 2, k);
        b.not(3, rk_from_constant(0));
        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::Add { dst: 1, lhs: 2, rhs: k },
            Instruction::Not { dst: 3, operand: RK_CONSTANT },
        ]);
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let bytes = [Op::Nil as u8, 0, 0xEE, 1];
        let mut decoder = BytecodeDecoder::new(&bytes);
        assert!(matches!(decoder.next(), Some(Ok((0, Instruction::Nil { dst: 0 })))));
        assert_eq!(
            decoder.next(),
            Some(Err(DecodeError::UnknownOpcode { byte: 0xEE, offset: 2 }))
        );
        assert_eq!(decoder.next(), None);
    }

    #[test]
    fn truncated_operands_are_reported() {
        let bytes = [Op::LoadK as u8, 1, 0];
        assert_eq!(
            decode_at(&bytes, 0),
            Err(DecodeError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn display_instructions() {
        assert_eq!(
            Instruction::Lookup { recv: 3, message: 5, cache: 1 }.to_string(),
            "Lookup r3, #5 ~1"
        );
        assert_eq!(
            Instruction::Call { recv: 2, argc: 1, splat: true, block: 1 }
                .to_string(),
            "Call r2, 1* &0"
        );
        assert_eq!(
            Instruction::Sub { dst: 0, lhs: 1, rhs: rk_from_constant(2) }
                .to_string(),
            "Sub r0, r1, k2"
        );
        assert_eq!(Instruction::Jump { offset: -7 }.to_string(), "Jump -7");
    }
}
