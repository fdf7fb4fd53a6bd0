//! Shared fixtures for the integration tests.
//!
//! `player_image` builds a host with a synthetic `Celeste.Player::orig_Update` whose
//! shape matches the parts of the real method the splices anchor on: the coyote
//! timer update, the two `MoveH`/`MoveV` collision calls and the camera update
//! guarded by a `StateMachine.State != 18` check.

#![allow(dead_code)]

use std::sync::Arc;

use ilsplice::{metadata::exceptions::ExceptionHandlerFlags, prelude::*};

pub const PLAYER: &str = "Celeste.Player";
pub const MOD: &str = "Celeste.Mod.ProgHelper.PlayerExtensions";

pub struct PlayerFixture {
    pub image: Arc<Image>,
    pub update: MethodRef,
    pub original: Vec<u8>,
}

pub fn player_image() -> Result<PlayerFixture> {
    let image = Arc::new(Image::new());

    let jump_grace_timer = image.add_field(FieldDesc::instance(PLAYER, "jumpGraceTimer"));
    let on_collide_h = image.add_field(FieldDesc::instance(PLAYER, "onCollideH"));
    let on_collide_v = image.add_field(FieldDesc::instance(PLAYER, "onCollideV"));
    let force_camera_update = image.add_field(FieldDesc::instance(PLAYER, "ForceCameraUpdate"));
    let state_machine = image.add_field(FieldDesc::instance(PLAYER, "StateMachine"));

    let delta_time = image.add_method_ref(MethodDesc::of_static("Monocle.Engine", "get_DeltaTime", 0, true));
    let move_h = image.add_method_ref(MethodDesc::instance("Celeste.Actor", "MoveH", 3, true));
    let move_v = image.add_method_ref(MethodDesc::instance("Celeste.Actor", "MoveV", 3, true));
    let get_state = image.add_method_ref(MethodDesc::instance("Monocle.StateMachine", "get_State", 0, true));
    let set_position = image.add_method_ref(MethodDesc::instance("Monocle.Camera", "set_Position", 1, false));

    let signature = MethodSignature::instance(0, false, 13);
    let body = BodyBuilder::new(signature)
        .locals(Token::from_parts(Token::STANDALONE_SIG, 0x42), true)
        // jumpGraceTimer -= Engine.DeltaTime
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, jump_grace_timer)
        .token(OpCode::Call, delta_time)
        .op(OpCode::Sub)
        .token(OpCode::Stfld, jump_grace_timer)
        // MoveH(moveX, onCollideH, null)
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldloc0)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, on_collide_h)
        .op(OpCode::Ldnull)
        .token(OpCode::Callvirt, move_h)
        .op(OpCode::Pop)
        // MoveV(moveY, onCollideV, null)
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldloc1)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, on_collide_v)
        .op(OpCode::Ldnull)
        .token(OpCode::Callvirt, move_v)
        .op(OpCode::Pop)
        // if (ForceCameraUpdate) { if (StateMachine.State == 18) ... else camera.Position = cameraTarget; }
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, force_camera_update)
        .branch(OpCode::BrfalseS, "end")
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, state_machine)
        .token(OpCode::Callvirt, get_state)
        .ldc_i4(18)
        .branch(OpCode::BneUnS, "camera")
        .op(OpCode::Ldarg0)
        .ldc_i4(0)
        .token(OpCode::Stfld, force_camera_update)
        .branch(OpCode::BrS, "end")
        .label("camera")
        .op(OpCode::Ldloc2)
        .emit(OpCode::LdlocS, Operand::Local(12))
        .token(OpCode::Callvirt, set_position)
        .label("end")
        .op(OpCode::Ret)
        .build(&*image)?;

    let update = MethodRef::new(PLAYER, "orig_Update");
    image.define_method(update.clone(), signature, body.clone());

    Ok(PlayerFixture {
        image,
        update,
        original: body,
    })
}

/// The four splices of the player update, in order.
pub fn player_update_session(session: PatchSession) -> PatchSession {
    session
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
            Action::Call(
                ExternalRoutine::action("Celeste.Mod.ProgHelper.ClipPreventionTrigger", "BeginTestH", 1),
                vec![SpliceArg::This],
            ),
        )
        .step(
            "collide-h-end",
            Locate::Advance(2),
            Action::Call(
                ExternalRoutine::action("Celeste.Mod.ProgHelper.ClipPreventionTrigger", "EndTest", 0),
                vec![],
            ),
        )
        .step(
            "collide-v-begin",
            Locate::Next(
                Pattern::new("vertical collision callback")
                    .load_field(PLAYER, "onCollideV")
                    .opcode(OpCode::Ldnull),
                MoveType::After,
            ),
            Action::Call(
                ExternalRoutine::action("Celeste.Mod.ProgHelper.ClipPreventionTrigger", "BeginTestV", 1),
                vec![SpliceArg::This],
            ),
        )
        .step(
            "collide-v-end",
            Locate::Advance(2),
            Action::Call(
                ExternalRoutine::action("Celeste.Mod.ProgHelper.ClipPreventionTrigger", "EndTest", 0),
                vec![],
            ),
        )
        .step(
            "camera-guard",
            Locate::Next(
                Pattern::new("force camera update").load_field(PLAYER, "ForceCameraUpdate"),
                MoveType::Before,
            ),
            Action::None,
        )
        .step(
            "camera-state",
            Locate::Next(
                Pattern::new("state check")
                    .callvirt("Monocle.StateMachine", "get_State")
                    .ldc_i4(18),
                MoveType::Before,
            ),
            Action::None,
        )
        .step(
            "camera-branch",
            Locate::Next(
                Pattern::new("not state 18").branch_capture(&[OpCode::BneUn, OpCode::BneUnS], "camera"),
                MoveType::Before,
            ),
            Action::None,
        )
        .step("camera-target", Locate::Label("camera".into()), Action::None)
        .step(
            "camera-constraints",
            Locate::Next(
                Pattern::new("camera position store").callvirt("Monocle.Camera", "set_Position"),
                MoveType::Before,
            ),
            Action::Call(
                ExternalRoutine::function(MOD, "ApplyCameraConstraints", 3),
                vec![SpliceArg::This, SpliceArg::Local(12)],
            ),
        )
}

/// A small tiny-header method: `this.x -= 1; return;`
pub fn define_mover(image: &Image, type_name: &str) -> Result<(MethodRef, Vec<u8>)> {
    let x = image.add_field(FieldDesc::instance(type_name, "x"));
    let signature = MethodSignature::instance(0, false, 0);
    let body = BodyBuilder::new(signature)
        .op(OpCode::Ldarg0)
        .op(OpCode::Ldarg0)
        .token(OpCode::Ldfld, x)
        .ldc_i4(1)
        .op(OpCode::Sub)
        .token(OpCode::Stfld, x)
        .op(OpCode::Ret)
        .build(image)?;
    let method = MethodRef::new(type_name, "Update");
    image.define_method(method.clone(), signature, body.clone());
    Ok((method, body))
}

/// A method with a try/finally: `try { this.Tick(); } finally { this.Done(); } return;`
pub fn define_guarded(image: &Image) -> Result<(MethodRef, Vec<u8>)> {
    let tick = image.add_method_ref(MethodDesc::instance("Level", "Tick", 0, false));
    let done = image.add_method_ref(MethodDesc::instance("Level", "Done", 0, false));
    let signature = MethodSignature::instance(0, false, 0);
    let body = BodyBuilder::new(signature)
        .label("try")
        .op(OpCode::Ldarg0)
        .token(OpCode::Call, tick)
        .branch(OpCode::LeaveS, "end")
        .label("finally")
        .op(OpCode::Ldarg0)
        .token(OpCode::Call, done)
        .op(OpCode::Endfinally)
        .label("end")
        .op(OpCode::Ret)
        .region(ExceptionHandlerFlags::FINALLY, "try", "finally", Some("end"), 0)
        .build(image)?;
    let method = MethodRef::new("Level", "Update");
    image.define_method(method.clone(), signature, body.clone());
    Ok((method, body))
}
