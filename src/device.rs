// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2023 Takashi Sakamoto

use {
    super::{config_rom, detect, dispatcher::Dispatcher, read, update, DeviceArguments, DeviceOperation},
    efw_downloader_protocols::transaction::EfwTransaction,
    glib::Error,
    hinawa::{prelude::*, FwNode},
    tracing::debug,
};

const NODE_DISPATCHER_NAME: &str = "node event dispatcher";

pub fn run(args: &DeviceArguments) -> Result<(), Error> {
    let node = FwNode::new();
    node.open(&args.cdev, 0)?;

    let data = node.config_rom()?;
    let (vendor_id, model_id) = config_rom::detect_vendor_and_model(&data)?;
    debug!(vendor_id, model_id, "detected unit");

    let mut proto = EfwTransaction::new();
    proto.bind(&node).map_err(|e| {
        eprintln!(
            "The address region for response may be reserved by ALSA Fireworks driver: {}",
            e
        );
        e
    })?;

    let result = Dispatcher::run(NODE_DISPATCHER_NAME.to_string()).and_then(|mut dispatcher| {
        dispatcher.attach_fw_node(&node, |_| debug!("the node is disconnected"))?;

        let result = match &args.op {
            DeviceOperation::Detect => detect::run(&mut proto),
            DeviceOperation::Read(op_args) => read::run(&mut proto, op_args.offset, op_args.length),
            DeviceOperation::Update(op_args) => {
                update::run(&mut proto, &op_args.path, op_args.dry_run)
            }
        };

        dispatcher.stop();

        result
    });

    proto.unbind();

    result
}
