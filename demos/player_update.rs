//! Splice two calls into a small player update method, print the body before and
//! after, then restore it.
//!
//! Run with `RUST_LOG=ilsplice=trace` to see every matched step.

use std::sync::Arc;

use ilsplice::{assembly::decode_body, prelude::*};

const PLAYER: &str = "Celeste.Player";
const MOD: &str = "Celeste.Mod.ProgHelper.PlayerExtensions";

fn build_player(image: &Image) -> Result<MethodRef> {
    let timer = image.add_field(FieldDesc::instance(PLAYER, "jumpGraceTimer"));
    let on_collide_h = image.add_field(FieldDesc::instance(PLAYER, "onCollideH"));
    let delta = image.add_method_ref(MethodDesc::of_static("Monocle.Engine", "get_DeltaTime", 0, true));
    let move_h = image.add_method_ref(MethodDesc::instance("Celeste.Actor", "MoveH", 3, true));

    let update = MethodRef::new(PLAYER, "orig_Update");
    let signature = MethodSignature::instance(0, false, 1);
    let body = BodyBuilder::new(signature)
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, timer)
        .token(OpCode::Call, delta)
        .op(OpCode::Sub)
        .token(OpCode::Stfld, timer)
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldloc0)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, on_collide_h)
        .op(OpCode::Ldnull)
        .token(OpCode::Callvirt, move_h)
        .op(OpCode::Pop)
        .op(OpCode::Ret)
        .build(image)?;
    image.define_method(update.clone(), signature, body);
    Ok(update)
}

fn print_body(title: &str, image: &Image, method: &MethodRef) -> Result<()> {
    let (header, seq) = decode_body(&image.read_body(method)?, image.signature(method)?)?;
    println!("{title} (max_stack {}, {} bytes of code)", header.max_stack, header.size_code);
    println!("{seq}");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_module("ilsplice", log::LevelFilter::Info)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    let image = Arc::new(Image::new());
    let update = build_player(&image)?;
    print_body("original", &image, &update)?;

    let handle = PatchSession::open(image.clone(), update.clone())
        .step(
            "coyote-jump",
            Locate::Next(
                Pattern::new("jump grace timer update")
                    .call("Monocle.Engine", "get_DeltaTime")
                    .opcode(OpCode::Sub)
                    .store_field(PLAYER, "jumpGraceTimer"),
                MoveType::After,
            ),
            Action::Call(
                ExternalRoutine::action(MOD, "CheckForDisableCoyoteJump", 1),
                vec![SpliceArg::This],
            ),
        )
        .step(
            "collide-h-begin",
            Locate::Next(
                Pattern::new("horizontal collision callback")
                    .load_field(PLAYER, "onCollideH")
                    .opcode(OpCode::Ldnull),
                MoveType::After,
            ),
            Action::Call(ExternalRoutine::action(MOD, "BeginTestH", 1), vec![SpliceArg::This]),
        )
        .step(
            "collide-h-end",
            Locate::Advance(2),
            Action::Call(ExternalRoutine::action(MOD, "EndTest", 0), vec![]),
        )
        .apply()?;
    print_body("patched", &image, &update)?;

    handle.dispose()?;
    print_body("restored", &image, &update)?;
    Ok(())
}
